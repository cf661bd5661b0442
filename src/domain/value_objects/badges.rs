//! Status badges shown on admin and account screens.
//!
//! Every badge-bearing value is a closed enum rendered by an exhaustive
//! `match`. Wire strings that do not name a known variant fail to parse, so a
//! new backend value shows up as an error instead of a wrong badge.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTone {
    Neutral,
    Info,
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Badge {
    pub label: &'static str,
    pub tone: BadgeTone,
}

impl Badge {
    const fn new(label: &'static str, tone: BadgeTone) -> Self {
        Self { label, tone }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownBadgeValue {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Login,
    UserCreated,
    UserUpdated,
    UserSuspended,
    UserDeleted,
    SongApproved,
    SongRejected,
    PaymentRefunded,
    SettingsChanged,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Artist,
    Moderator,
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Success,
    Pending,
    Failed,
    Refunded,
}

impl AdminAction {
    pub fn badge(&self) -> Badge {
        match self {
            AdminAction::Login => Badge::new("Login", BadgeTone::Neutral),
            AdminAction::UserCreated => Badge::new("User Created", BadgeTone::Success),
            AdminAction::UserUpdated => Badge::new("User Updated", BadgeTone::Info),
            AdminAction::UserSuspended => Badge::new("User Suspended", BadgeTone::Warning),
            AdminAction::UserDeleted => Badge::new("User Deleted", BadgeTone::Danger),
            AdminAction::SongApproved => Badge::new("Song Approved", BadgeTone::Success),
            AdminAction::SongRejected => Badge::new("Song Rejected", BadgeTone::Danger),
            AdminAction::PaymentRefunded => Badge::new("Payment Refunded", BadgeTone::Warning),
            AdminAction::SettingsChanged => Badge::new("Settings Changed", BadgeTone::Info),
        }
    }
}

impl Severity {
    pub fn badge(&self) -> Badge {
        match self {
            Severity::Low => Badge::new("Low", BadgeTone::Neutral),
            Severity::Medium => Badge::new("Medium", BadgeTone::Info),
            Severity::High => Badge::new("High", BadgeTone::Warning),
            Severity::Critical => Badge::new("Critical", BadgeTone::Danger),
        }
    }
}

impl UserRole {
    pub fn badge(&self) -> Badge {
        match self {
            UserRole::Artist => Badge::new("Artist", BadgeTone::Neutral),
            UserRole::Moderator => Badge::new("Moderator", BadgeTone::Info),
            UserRole::Admin => Badge::new("Admin", BadgeTone::Warning),
            UserRole::SuperAdmin => Badge::new("Super Admin", BadgeTone::Danger),
        }
    }
}

impl PaymentState {
    pub fn badge(&self) -> Badge {
        match self {
            PaymentState::Success => Badge::new("Paid", BadgeTone::Success),
            PaymentState::Pending => Badge::new("Pending", BadgeTone::Warning),
            PaymentState::Failed => Badge::new("Failed", BadgeTone::Danger),
            PaymentState::Refunded => Badge::new("Refunded", BadgeTone::Info),
        }
    }
}

fn parse_wire<T: for<'de> Deserialize<'de>>(
    kind: &'static str,
    raw: &str,
) -> Result<T, UnknownBadgeValue> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())).map_err(
        |_| UnknownBadgeValue {
            kind,
            value: raw.to_string(),
        },
    )
}

impl FromStr for AdminAction {
    type Err = UnknownBadgeValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire("admin action", s)
    }
}

impl FromStr for Severity {
    type Err = UnknownBadgeValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire("severity", s)
    }
}

impl FromStr for UserRole {
    type Err = UnknownBadgeValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire("user role", s)
    }
}

impl FromStr for PaymentState {
    type Err = UnknownBadgeValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire("payment state", s)
    }
}
