use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::domain::{
    entities::payments::PendingPaymentIntent,
    value_objects::enums::{
        subscription_types::SubscriptionType, verification_statuses::VerificationStatus,
    },
};

pub const SUPPORT_MESSAGE: &str = "We could not confirm this payment. If you were charged, \
contact support with your payment reference and we will sort it out.";

/// Where the upgrade flow currently stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UpgradePhase {
    #[default]
    Idle,
    PricingFetched {
        plan: SubscriptionType,
        amount: f64,
    },
    PaymentInitiated {
        intent: PendingPaymentIntent,
    },
    Verifying {
        reference: String,
    },
    VerifiedSuccess(UpgradeConfirmation),
    AwaitingManualAction {
        reference: Option<String>,
        reason: PendingReason,
    },
    VerificationFailed {
        reference: String,
        support_message: String,
    },
}

/// Why a payment is waiting on the user rather than on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReason {
    VerificationTimedOut,
    VerificationUnreachable,
    VerificationUnconfirmed(VerificationStatus),
}

impl Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingReason::VerificationTimedOut => {
                write!(f, "Payment verification is taking longer than expected")
            }
            PendingReason::VerificationUnreachable => {
                write!(f, "We could not reach the server to verify your payment")
            }
            PendingReason::VerificationUnconfirmed(status) => {
                write!(f, "Your payment has not been confirmed yet (status: {})", status)
            }
        }
    }
}

impl UpgradePhase {
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            UpgradePhase::PricingFetched { .. }
                | UpgradePhase::PaymentInitiated { .. }
                | UpgradePhase::Verifying { .. }
        )
    }

    /// True when a new purchase may begin from this phase.
    pub fn accepts_new_upgrade(&self) -> bool {
        matches!(
            self,
            UpgradePhase::Idle
                | UpgradePhase::VerifiedSuccess(_)
                | UpgradePhase::VerificationFailed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            UpgradePhase::Idle => "idle",
            UpgradePhase::PricingFetched { .. } => "pricing_fetched",
            UpgradePhase::PaymentInitiated { .. } => "payment_initiated",
            UpgradePhase::Verifying { .. } => "verifying",
            UpgradePhase::VerifiedSuccess(_) => "verified_success",
            UpgradePhase::AwaitingManualAction { .. } => "awaiting_manual_action",
            UpgradePhase::VerificationFailed { .. } => "verification_failed",
        }
    }
}

/// Snapshot published to whatever renders the upgrade screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpgradeView {
    pub phase: UpgradePhase,
    pub manual_actions_visible: bool,
}

impl UpgradeView {
    pub fn is_loading(&self) -> bool {
        self.phase.is_loading()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeConfirmation {
    pub plan: SubscriptionType,
    pub plan_name: String,
    pub benefit: String,
}

impl UpgradeConfirmation {
    pub fn new(plan: SubscriptionType, credits: Option<u32>) -> Self {
        let benefit = match plan {
            SubscriptionType::Yearly => "Unlimited uploads for one year".to_string(),
            SubscriptionType::PayPerSong => {
                format!("{} upload credit(s)", credits.unwrap_or(0))
            }
            SubscriptionType::Free => "Free plan access".to_string(),
        };

        Self {
            plan,
            plan_name: plan.display_name().to_string(),
            benefit,
        }
    }
}

/// One upgrade button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanOption {
    pub plan: SubscriptionType,
    pub is_current: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostPurchaseAction {
    ContinueToUpload,
    GoToDashboard,
}

/// Parameters the payment widget is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetSession {
    pub key: String,
    pub email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
}

/// What the widget hands back on a completed charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetTransaction {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub trans: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    Success(WidgetTransaction),
    Closed,
}
