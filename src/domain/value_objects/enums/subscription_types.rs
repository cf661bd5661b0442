use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    #[default]
    Free,
    PayPerSong,
    Yearly,
}

impl SubscriptionType {
    /// Plans that can be bought through the upgrade flow.
    pub const PURCHASABLE: [SubscriptionType; 2] =
        [SubscriptionType::PayPerSong, SubscriptionType::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Free => "free",
            SubscriptionType::PayPerSong => "pay_per_song",
            SubscriptionType::Yearly => "yearly",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SubscriptionType::Free => "Free",
            SubscriptionType::PayPerSong => "Pay Per Song",
            SubscriptionType::Yearly => "Yearly Premium",
        }
    }

    pub fn is_purchasable(&self) -> bool {
        Self::PURCHASABLE.contains(self)
    }
}

impl Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown subscription type: {0}")]
pub struct UnknownSubscriptionType(pub String);

impl FromStr for SubscriptionType {
    type Err = UnknownSubscriptionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionType::Free),
            "pay_per_song" => Ok(SubscriptionType::PayPerSong),
            "yearly" => Ok(SubscriptionType::Yearly),
            _ => Err(UnknownSubscriptionType(s.to_string())),
        }
    }
}
