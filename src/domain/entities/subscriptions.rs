use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{
    enums::{subscription_statuses::SubscriptionStatus, subscription_types::SubscriptionType},
    upload_policy::FreeTierUploadPolicy,
};

/// The user's subscription as last reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "SubscriptionSnapshotRow")]
pub struct SubscriptionSnapshot {
    pub subscription_type: SubscriptionType,
    pub status: SubscriptionStatus,
    /// Only meaningful for pay-per-song.
    pub remaining_credits: u32,
    /// Only meaningful for yearly.
    pub end_date: Option<DateTime<Utc>>,
}

/// Raw body of `GET /payments/subscription/current/`. Credits arrive under
/// either `remaining_credits` or `song_credits` depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
struct SubscriptionSnapshotRow {
    #[serde(default)]
    subscription_type: SubscriptionType,
    #[serde(default)]
    status: SubscriptionStatus,
    #[serde(default)]
    remaining_credits: Option<u32>,
    #[serde(default)]
    song_credits: Option<u32>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
}

impl From<SubscriptionSnapshotRow> for SubscriptionSnapshot {
    fn from(value: SubscriptionSnapshotRow) -> Self {
        Self {
            subscription_type: value.subscription_type,
            status: value.status,
            remaining_credits: value.remaining_credits.or(value.song_credits).unwrap_or(0),
            end_date: value.end_date,
        }
    }
}

impl Default for SubscriptionSnapshot {
    fn default() -> Self {
        Self::free()
    }
}

impl SubscriptionSnapshot {
    pub fn free() -> Self {
        Self {
            subscription_type: SubscriptionType::Free,
            status: SubscriptionStatus::Active,
            remaining_credits: 0,
            end_date: None,
        }
    }

    pub fn can_upload(&self, now: DateTime<Utc>, policy: FreeTierUploadPolicy) -> bool {
        match self.subscription_type {
            SubscriptionType::Yearly => self.end_date.is_some_and(|end| end > now),
            SubscriptionType::PayPerSong => self.remaining_credits > 0,
            SubscriptionType::Free => policy.allows_upload(),
        }
    }

    pub fn with_remaining_credits(&self, remaining_credits: u32) -> Self {
        Self {
            remaining_credits,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn yearly_needs_a_future_end_date() {
        let now = Utc::now();
        let mut snapshot = SubscriptionSnapshot {
            subscription_type: SubscriptionType::Yearly,
            status: SubscriptionStatus::Active,
            remaining_credits: 0,
            end_date: Some(now + Duration::days(10)),
        };
        assert!(snapshot.can_upload(now, FreeTierUploadPolicy::Deny));

        snapshot.end_date = Some(now);
        assert!(!snapshot.can_upload(now, FreeTierUploadPolicy::Deny));

        snapshot.end_date = None;
        assert!(!snapshot.can_upload(now, FreeTierUploadPolicy::Allow));
    }

    #[test]
    fn free_tier_follows_policy() {
        let now = Utc::now();
        let snapshot = SubscriptionSnapshot::free();
        assert!(snapshot.can_upload(now, FreeTierUploadPolicy::Allow));
        assert!(!snapshot.can_upload(now, FreeTierUploadPolicy::Deny));
    }

    #[test]
    fn parses_song_credits_alias() {
        let snapshot: SubscriptionSnapshot = serde_json::from_str(
            r#"{"subscription_type":"pay_per_song","status":"active","song_credits":2}"#,
        )
        .unwrap();
        assert_eq!(snapshot.subscription_type, SubscriptionType::PayPerSong);
        assert_eq!(snapshot.remaining_credits, 2);
        assert_eq!(snapshot.end_date, None);
    }

    #[test]
    fn missing_fields_fall_back_to_free() {
        let snapshot: SubscriptionSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, SubscriptionSnapshot::free());
    }
}
