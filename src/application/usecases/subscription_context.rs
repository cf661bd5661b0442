use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::{
    entities::subscriptions::SubscriptionSnapshot,
    repositories::payments::PaymentsGateway,
    value_objects::{
        enums::{subscription_statuses::SubscriptionStatus, subscription_types::SubscriptionType},
        upgrade::PlanOption,
        upload_policy::FreeTierUploadPolicy,
    },
};

/// Owns the signed-in user's subscription state for the session.
///
/// Everything else reads through [`SubscriptionContext::snapshot`] or a
/// [`watch::Receiver`]. State is re-fetched from the backend; local writes are
/// limited to optimistic updates that the next [`SubscriptionContext::refresh`]
/// overwrites.
pub struct SubscriptionContext<G>
where
    G: PaymentsGateway + 'static,
{
    gateway: Arc<G>,
    policy: FreeTierUploadPolicy,
    state: watch::Sender<SubscriptionSnapshot>,
}

impl<G> SubscriptionContext<G>
where
    G: PaymentsGateway + 'static,
{
    pub fn new(gateway: Arc<G>, policy: FreeTierUploadPolicy) -> Self {
        let (state, _) = watch::channel(SubscriptionSnapshot::free());
        Self {
            gateway,
            policy,
            state,
        }
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubscriptionSnapshot> {
        self.state.subscribe()
    }

    pub fn policy(&self) -> FreeTierUploadPolicy {
        self.policy
    }

    /// Re-fetches the subscription. On failure the last known state is kept.
    pub async fn refresh(&self) -> Result<SubscriptionSnapshot> {
        let snapshot = self.gateway.current_subscription().await.map_err(|err| {
            warn!(
                error = ?err,
                "subscription_context: failed to refresh subscription, keeping last known state"
            );
            err
        })?;

        info!(
            subscription_type = %snapshot.subscription_type,
            status = %snapshot.status,
            remaining_credits = snapshot.remaining_credits,
            end_date = ?snapshot.end_date,
            "subscription_context: subscription refreshed"
        );

        self.state.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Optimistic update after the backend confirmed a payment.
    pub fn apply_verified_payment(&self, plan: SubscriptionType, credits: Option<u32>) {
        self.state.send_modify(|snapshot| {
            snapshot.subscription_type = plan;
            snapshot.status = SubscriptionStatus::Active;
            if let Some(credits) = credits {
                snapshot.remaining_credits = credits;
            }
        });
        info!(
            subscription_type = %plan,
            remaining_credits = ?credits,
            "subscription_context: applied verified payment"
        );
    }

    /// Optimistic update after the backend accepted a credit-consuming upload.
    pub fn record_credit_consumed(&self, remaining_credits: u32) {
        let current = self.snapshot();
        if current.subscription_type != SubscriptionType::PayPerSong {
            warn!(
                subscription_type = %current.subscription_type,
                "subscription_context: credit consumption reported for non credit-based plan"
            );
            return;
        }

        self.state
            .send_replace(current.with_remaining_credits(remaining_credits));
    }

    pub fn can_upload(&self) -> bool {
        self.can_upload_at(Utc::now())
    }

    pub fn can_upload_at(&self, now: DateTime<Utc>) -> bool {
        self.state.borrow().can_upload(now, self.policy)
    }

    /// Upgrade buttons: the current plan is never purchasable again, and
    /// nothing is while a purchase is in flight.
    pub fn plan_options(&self, loading: bool) -> Vec<PlanOption> {
        let current = self.state.borrow().subscription_type;
        SubscriptionType::PURCHASABLE
            .iter()
            .map(|plan| {
                let is_current = *plan == current;
                PlanOption {
                    plan: *plan,
                    is_current,
                    enabled: !is_current && !loading,
                }
            })
            .collect()
    }
}
