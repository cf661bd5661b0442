use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{
    entities::subscriptions::SubscriptionSnapshot,
    value_objects::{
        payments::{UpgradeRequest, UpgradeResponse, VerifyPendingResponse, VerifyResponse},
        pricing::PricingCatalog,
    },
};

/// Backend payment endpoints. Verification is idempotent on the server side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentsGateway: Send + Sync {
    async fn fetch_pricing(&self) -> Result<PricingCatalog>;

    async fn create_upgrade(&self, request: UpgradeRequest) -> Result<UpgradeResponse>;

    async fn verify_payment(&self, reference: &str) -> Result<VerifyResponse>;

    /// Reconciles every unconfirmed reference the backend holds for the user.
    async fn verify_pending_payments(&self) -> Result<VerifyPendingResponse>;

    async fn current_subscription(&self) -> Result<SubscriptionSnapshot>;
}
