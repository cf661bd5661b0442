use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::enums::subscription_types::SubscriptionType;

/// Body of `GET /payments/pricing/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PricingCatalog {
    #[serde(default)]
    pub subscriptions: HashMap<String, PlanPricing>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanPricing {
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub credits: Option<u32>,
}

impl PricingCatalog {
    pub fn pricing_for(&self, plan: SubscriptionType) -> Option<&PlanPricing> {
        self.subscriptions.get(plan.as_str())
    }

    /// Price of `plan` in major units. Missing or non-positive prices count as absent.
    pub fn amount_for(&self, plan: SubscriptionType) -> Option<f64> {
        self.pricing_for(plan)
            .map(|pricing| pricing.amount)
            .filter(|amount| amount.is_finite() && *amount > 0.0)
    }
}

/// Converts a major-unit amount to the minor units the payment widget expects.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
