use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Status reported by the backend for a verified payment reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Success,
    Failed,
    Pending,
    #[serde(other)]
    Unrecognized,
}

/// How the coordinator should treat a verification answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationVerdict {
    Confirmed,
    Rejected,
    Inconclusive,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Success => "success",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Unrecognized => "unrecognized",
        }
    }

    pub fn verdict(&self) -> VerificationVerdict {
        match self {
            VerificationStatus::Success => VerificationVerdict::Confirmed,
            VerificationStatus::Failed => VerificationVerdict::Rejected,
            VerificationStatus::Pending | VerificationStatus::Unrecognized => {
                VerificationVerdict::Inconclusive
            }
        }
    }
}

impl Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
