use std::str::FromStr;

use anyhow::{Context, Result, anyhow};

use super::{
    config_model::{Account, Api, DotEnvyConfig, Payments, Verification},
    stage::Stage,
};
use crate::domain::value_objects::upload_policy::FreeTierUploadPolicy;

const DEFAULT_CURRENCY: &str = "NGN";
const DEFAULT_PLACEHOLDER_EMAIL: &str = "customer@tunedrop.app";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let api = Api {
        base_url: required("API_BASE_URL")?,
        token: required("API_TOKEN")?,
        timeout_secs: parsed_or("HTTP_TIMEOUT_SECS", 20)?,
    };

    let account = Account {
        username: optional("ACCOUNT_USERNAME").unwrap_or_else(|| "artist".to_string()),
        email: optional("USER_EMAIL"),
    };

    let payments = Payments {
        paystack_public_key: required("PAYSTACK_PUBLIC_KEY")?,
        currency: optional("PAYMENT_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        placeholder_email: optional("PLACEHOLDER_EMAIL")
            .unwrap_or_else(|| DEFAULT_PLACEHOLDER_EMAIL.to_string()),
        auto_renew: flag_or("AUTO_RENEW", false)?,
    };

    let verification = Verification {
        delay_ms: parsed_or("VERIFICATION_DELAY_MS", 2000)?,
        timeout_secs: parsed_or("VERIFICATION_TIMEOUT_SECS", 30)?,
        emergency_actions_secs: parsed_or("EMERGENCY_ACTIONS_SECS", 15)?,
    };

    let free_tier_uploads = match optional("FREE_TIER_UPLOADS") {
        Some(raw) => FreeTierUploadPolicy::parse(&raw)
            .ok_or_else(|| anyhow!("FREE_TIER_UPLOADS is invalid: {raw}"))?,
        None => FreeTierUploadPolicy::default(),
    };

    Ok(DotEnvyConfig {
        api,
        account,
        payments,
        verification,
        free_tier_uploads,
    })
}

pub fn get_stage() -> Stage {
    dotenvy::dotenv().ok();

    let stage_str = std::env::var("STAGE").unwrap_or("".to_string());
    Stage::try_from(&stage_str).unwrap_or_default()
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{key} is invalid"))
}

fn parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} is invalid: {raw}")),
        None => Ok(default),
    }
}

fn flag_or(key: &str, default: bool) -> Result<bool> {
    match optional(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{key} is invalid: {raw}")),
        },
        None => Ok(default),
    }
}
