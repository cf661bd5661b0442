use serde::{Deserialize, Serialize};

/// Whether free-tier accounts may upload. Business policy, set by configuration.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FreeTierUploadPolicy {
    Allow,
    #[default]
    Deny,
}

impl FreeTierUploadPolicy {
    pub fn allows_upload(&self) -> bool {
        matches!(self, FreeTierUploadPolicy::Allow)
    }

    /// Parses the usual boolean spellings; anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "on" | "allow" => Some(FreeTierUploadPolicy::Allow),
            "0" | "false" | "f" | "no" | "n" | "off" | "deny" => Some(FreeTierUploadPolicy::Deny),
            _ => None,
        }
    }
}
