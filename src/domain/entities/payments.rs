use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{
    enums::subscription_types::SubscriptionType, payments::UpgradeResponse,
};

/// Correlation token for one payment attempt. Lives only as long as the popup session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPaymentIntent {
    pub reference: String,
    pub plan: SubscriptionType,
    pub amount: f64,
}

impl PendingPaymentIntent {
    pub fn from_upgrade(plan: SubscriptionType, response: UpgradeResponse) -> Self {
        Self {
            reference: response.reference,
            plan,
            amount: response.amount,
        }
    }
}
