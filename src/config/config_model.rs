use crate::domain::value_objects::upload_policy::FreeTierUploadPolicy;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub api: Api,
    pub account: Account,
    pub payments: Payments,
    pub verification: Verification,
    pub free_tier_uploads: FreeTierUploadPolicy,
}

#[derive(Debug, Clone)]
pub struct Api {
    pub base_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Payments {
    pub paystack_public_key: String,
    pub currency: String,
    pub placeholder_email: String,
    pub auto_renew: bool,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub delay_ms: u64,
    pub timeout_secs: u64,
    pub emergency_actions_secs: u64,
}
