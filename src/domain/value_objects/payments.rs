use serde::{Deserialize, Serialize};

use crate::domain::value_objects::enums::{
    subscription_types::SubscriptionType, verification_statuses::VerificationStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpgradeRequest {
    pub subscription_type: SubscriptionType,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpgradeResponse {
    pub reference: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyRequest {
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyResponse {
    pub status: VerificationStatus,
    #[serde(default)]
    pub subscription_type: Option<SubscriptionType>,
    #[serde(default)]
    pub remaining_credits: Option<u32>,
    #[serde(default)]
    pub song_credits: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl VerifyResponse {
    /// Older backend builds report credits as `song_credits`.
    pub fn credits(&self) -> Option<u32> {
        self.remaining_credits.or(self.song_credits)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifyPendingResponse {
    #[serde(default)]
    pub verified_count: u32,
    #[serde(default)]
    pub message: Option<String>,
}
