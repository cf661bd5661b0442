use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    application::usecases::subscription_context::SubscriptionContext,
    domain::{
        entities::{payments::PendingPaymentIntent, users::AuthUser},
        repositories::{
            notifications::Notifier,
            payment_widget::{PaymentWidget, WidgetCallbacks},
            payments::PaymentsGateway,
        },
        value_objects::{
            enums::{
                subscription_types::SubscriptionType,
                verification_statuses::{VerificationStatus, VerificationVerdict},
            },
            notifications::Toast,
            payments::{UpgradeRequest, VerifyResponse},
            pricing::to_minor_units,
            upgrade::{
                PendingReason, PostPurchaseAction, SUPPORT_MESSAGE, UpgradeConfirmation,
                UpgradePhase, UpgradeView, WidgetEvent, WidgetSession, WidgetTransaction,
            },
        },
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeTimings {
    /// Pause before verifying so the backend can process the provider webhook.
    pub verification_delay: Duration,
    /// Upper bound on a single verification call.
    pub verification_timeout: Duration,
    /// How long a verification may spin before manual actions are shown.
    pub emergency_actions_after: Duration,
}

impl Default for UpgradeTimings {
    fn default() -> Self {
        Self {
            verification_delay: Duration::from_secs(2),
            verification_timeout: Duration::from_secs(30),
            emergency_actions_after: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    pub widget_public_key: String,
    pub currency: String,
    pub placeholder_email: String,
    pub auto_renew: bool,
    pub timings: UpgradeTimings,
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("payment widget is not available")]
    WidgetUnavailable,
    #[error("pricing unavailable for plan: {0}")]
    PricingUnavailable(SubscriptionType),
    #[error("already subscribed to plan: {0}")]
    AlreadyOnPlan(SubscriptionType),
    #[error("plan cannot be purchased: {0}")]
    NotPurchasable(SubscriptionType),
    #[error("an upgrade is already in progress")]
    UpgradeInProgress,
    #[error("no payment is awaiting verification")]
    NoPendingPayment,
    #[error("upgrade flow has been torn down")]
    TornDown,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type UpgradeResult<T> = std::result::Result<T, UpgradeError>;

enum VerificationOutcome {
    Confirmed(VerifyResponse),
    Rejected(VerifyResponse),
    Unconfirmed(VerificationStatus),
    TimedOut,
    Unreachable(anyhow::Error),
}

#[derive(Debug, Default)]
struct FlowState {
    /// Popup session counter; widget events from older sessions are dropped.
    session: u64,
    starting: bool,
    selected_plan: Option<SubscriptionType>,
    /// Intent for the popup that is currently open.
    intent: Option<PendingPaymentIntent>,
    /// Backend reference of the current session. Outlives a cancelled popup so
    /// a late success is still verified.
    session_reference: Option<String>,
    /// Set once the widget reported success; cleared on a definitive answer.
    pending_reference: Option<String>,
}

/// Drives one user through buying a plan with the payment widget and
/// reconciles the widget's callbacks with the backend's verification.
pub struct SubscriptionUpgradeUseCase<G, W, N>
where
    G: PaymentsGateway + 'static,
    W: PaymentWidget + 'static,
    N: Notifier + 'static,
{
    gateway: Arc<G>,
    widget: Arc<W>,
    notifier: Arc<N>,
    context: Arc<SubscriptionContext<G>>,
    user: AuthUser,
    settings: UpgradeSettings,
    flow: Mutex<FlowState>,
    /// Reference whose verification call is in flight.
    verifying: Mutex<Option<String>>,
    torn_down: AtomicBool,
    view: watch::Sender<UpgradeView>,
    emergency_timer: Mutex<Option<JoinHandle<()>>>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl<G, W, N> SubscriptionUpgradeUseCase<G, W, N>
where
    G: PaymentsGateway + 'static,
    W: PaymentWidget + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        gateway: Arc<G>,
        widget: Arc<W>,
        notifier: Arc<N>,
        context: Arc<SubscriptionContext<G>>,
        user: AuthUser,
        settings: UpgradeSettings,
    ) -> Self {
        let (view, _) = watch::channel(UpgradeView::default());
        Self {
            gateway,
            widget,
            notifier,
            context,
            user,
            settings,
            flow: Mutex::new(FlowState::default()),
            verifying: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            view,
            emergency_timer: Mutex::new(None),
            event_pump: Mutex::new(None),
        }
    }

    pub fn view(&self) -> UpgradeView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpgradeView> {
        self.view.subscribe()
    }

    pub fn context(&self) -> &Arc<SubscriptionContext<G>> {
        &self.context
    }

    /// Fetches pricing, creates the payment intent and opens the widget.
    pub async fn start_upgrade(
        self: &Arc<Self>,
        plan: SubscriptionType,
    ) -> UpgradeResult<PendingPaymentIntent> {
        info!(plan = %plan, "subscription_upgrade: upgrade requested");
        self.claim_start(plan)?;

        let result = self.initiate_payment(plan).await;
        self.flow().starting = false;

        if let Err(err) = &result {
            warn!(plan = %plan, error = %err, "subscription_upgrade: upgrade not started");
            self.flow().selected_plan = None;
            self.publish(UpgradePhase::Idle, false);
        }

        result
    }

    fn claim_start(&self, plan: SubscriptionType) -> UpgradeResult<()> {
        if self.is_torn_down() {
            return Err(UpgradeError::TornDown);
        }
        if !plan.is_purchasable() {
            return Err(UpgradeError::NotPurchasable(plan));
        }
        if self.context.snapshot().subscription_type == plan {
            return Err(UpgradeError::AlreadyOnPlan(plan));
        }

        let accepts_new_upgrade = self.view.borrow().phase.accepts_new_upgrade();
        let mut flow = self.flow();
        if flow.starting || !accepts_new_upgrade || flow.pending_reference.is_some() {
            return Err(UpgradeError::UpgradeInProgress);
        }
        flow.starting = true;
        flow.selected_plan = Some(plan);
        Ok(())
    }

    async fn initiate_payment(
        self: &Arc<Self>,
        plan: SubscriptionType,
    ) -> UpgradeResult<PendingPaymentIntent> {
        if !self.widget.is_loaded() {
            error!("subscription_upgrade: payment widget is not loaded");
            self.notifier.notify(Toast::error(
                "Payment service is not available. Please refresh the page and try again.",
            ));
            return Err(UpgradeError::WidgetUnavailable);
        }

        let pricing = self.gateway.fetch_pricing().await.map_err(|err| {
            error!(error = ?err, "subscription_upgrade: failed to fetch pricing");
            self.notifier
                .notify(Toast::error("Could not load pricing. Please try again."));
            UpgradeError::Internal(err)
        })?;

        let Some(amount) = pricing.amount_for(plan) else {
            error!(plan = %plan, "subscription_upgrade: pricing missing for plan");
            self.notifier.notify(Toast::error(format!(
                "Pricing for {} is not available right now.",
                plan.display_name()
            )));
            return Err(UpgradeError::PricingUnavailable(plan));
        };
        self.publish(UpgradePhase::PricingFetched { plan, amount }, false);

        let response = self
            .gateway
            .create_upgrade(UpgradeRequest {
                subscription_type: plan,
                auto_renew: self.settings.auto_renew,
            })
            .await
            .map_err(|err| {
                error!(
                    plan = %plan,
                    error = ?err,
                    "subscription_upgrade: failed to create payment intent"
                );
                self.notifier
                    .notify(Toast::error("Could not start the payment. Please try again."));
                UpgradeError::Internal(err)
            })?;

        let intent = PendingPaymentIntent::from_upgrade(plan, response);
        let session = self.widget_session(&intent);
        info!(
            plan = %plan,
            reference = %intent.reference,
            amount_minor = session.amount_minor,
            currency = %session.currency,
            "subscription_upgrade: payment intent created"
        );

        let (callbacks, events) = WidgetCallbacks::channel();
        let session_id = {
            let mut flow = self.flow();
            flow.session += 1;
            flow.intent = Some(intent.clone());
            flow.session_reference = Some(intent.reference.clone());
            flow.pending_reference = None;
            flow.session
        };
        self.spawn_event_pump(session_id, events);
        self.publish(
            UpgradePhase::PaymentInitiated {
                intent: intent.clone(),
            },
            false,
        );

        if let Err(err) = self.widget.open(session, callbacks) {
            error!(error = ?err, "subscription_upgrade: failed to open payment widget");
            {
                let mut flow = self.flow();
                flow.intent = None;
                flow.session_reference = None;
            }
            self.stop_event_pump();
            self.notifier
                .notify(Toast::error("Could not open the payment window. Please try again."));
            return Err(UpgradeError::Internal(err));
        }

        Ok(intent)
    }

    fn widget_session(&self, intent: &PendingPaymentIntent) -> WidgetSession {
        let email = self.user.checkout_email(&self.settings.placeholder_email);
        if email.is_placeholder() {
            warn!(
                username = %self.user.username,
                "subscription_upgrade: account email missing or malformed, using placeholder"
            );
        }

        WidgetSession {
            key: self.settings.widget_public_key.clone(),
            email: email.into_address(),
            amount_minor: to_minor_units(intent.amount),
            currency: self.settings.currency.clone(),
            reference: intent.reference.clone(),
        }
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        session_id: u64,
        mut events: mpsc::UnboundedReceiver<WidgetEvent>,
    ) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if this.flow().session != session_id {
                    debug!(
                        session_id,
                        "subscription_upgrade: dropping event from stale widget session"
                    );
                    continue;
                }

                match event {
                    WidgetEvent::Success(transaction) => {
                        // Accept before spawning so a close right behind it sees the guard.
                        if let Some(reference) = this.accept_payment_success(transaction) {
                            let verifier = Arc::clone(&this);
                            tokio::spawn(async move {
                                verifier.verify_reference(reference).await;
                            });
                        }
                    }
                    WidgetEvent::Closed => this.on_popup_closed(),
                }
            }

            // Every callback handle is gone without an explicit close.
            if this.flow().session == session_id {
                debug!(session_id, "subscription_upgrade: widget callbacks dropped");
                this.on_popup_closed();
            }
        });

        let previous = self.event_pump_slot().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_event_pump(&self) {
        if let Some(handle) = self.event_pump_slot().take() {
            handle.abort();
        }
    }

    pub async fn handle_widget_event(self: &Arc<Self>, event: WidgetEvent) {
        match event {
            WidgetEvent::Success(transaction) => self.on_payment_success(transaction).await,
            WidgetEvent::Closed => self.on_popup_closed(),
        }
    }

    /// Widget reported a completed charge. Verifies it unless this reference
    /// is already being handled.
    pub async fn on_payment_success(self: &Arc<Self>, transaction: WidgetTransaction) {
        if let Some(reference) = self.accept_payment_success(transaction) {
            self.verify_reference(reference).await;
        }
    }

    fn accept_payment_success(self: &Arc<Self>, transaction: WidgetTransaction) -> Option<String> {
        if self.is_torn_down() {
            return None;
        }

        let reference = {
            let mut flow = self.flow();
            let Some(reference) = flow.session_reference.clone() else {
                warn!(
                    reference = %transaction.reference,
                    "subscription_upgrade: payment success with no active session"
                );
                return None;
            };

            if flow.pending_reference.is_some() {
                debug!(%reference, "subscription_upgrade: duplicate payment success ignored");
                return None;
            }

            if !transaction.reference.is_empty() && transaction.reference != reference {
                warn!(
                    expected = %reference,
                    received = %transaction.reference,
                    "subscription_upgrade: widget reference differs from backend reference"
                );
            }

            flow.pending_reference = Some(reference.clone());
            reference
        };

        info!(%reference, "subscription_upgrade: payment reported successful, verifying");
        self.publish(
            UpgradePhase::Verifying {
                reference: reference.clone(),
            },
            false,
        );
        self.arm_emergency_timer();
        Some(reference)
    }

    /// Widget dismissed. Cancels the purchase unless a success was already recorded.
    pub fn on_popup_closed(self: &Arc<Self>) {
        if self.is_torn_down() {
            return;
        }

        let cancelled = {
            let mut flow = self.flow();
            if flow.pending_reference.is_some() {
                false
            } else if flow.intent.is_none() {
                debug!("subscription_upgrade: popup closed with no open payment");
                return;
            } else {
                flow.intent = None;
                true
            }
        };

        if cancelled {
            info!("subscription_upgrade: payment cancelled by user");
            self.publish(UpgradePhase::Idle, false);
            self.notifier.notify(Toast::info("Payment cancelled"));
            return;
        }

        if self.view.borrow().is_loading() {
            debug!("subscription_upgrade: popup closed while verification is running");
            self.arm_emergency_timer();
        }
    }

    async fn verify_reference(self: &Arc<Self>, reference: String) {
        {
            let mut in_flight = self.verifying_slot();
            if in_flight.as_deref() == Some(reference.as_str()) {
                debug!(%reference, "subscription_upgrade: verification already in flight");
                return;
            }
            *in_flight = Some(reference.clone());
        }

        let outcome = self.run_verification(&reference).await;
        {
            let mut in_flight = self.verifying_slot();
            if in_flight.as_deref() == Some(reference.as_str()) {
                *in_flight = None;
            }
        }
        self.apply_verification_outcome(reference, outcome).await;
    }

    async fn run_verification(&self, reference: &str) -> VerificationOutcome {
        tokio::time::sleep(self.settings.timings.verification_delay).await;

        let verification = tokio::time::timeout(
            self.settings.timings.verification_timeout,
            self.gateway.verify_payment(reference),
        )
        .await;

        match verification {
            Err(_) => VerificationOutcome::TimedOut,
            Ok(Err(err)) => VerificationOutcome::Unreachable(err),
            Ok(Ok(response)) => match response.status.verdict() {
                VerificationVerdict::Confirmed => VerificationOutcome::Confirmed(response),
                VerificationVerdict::Rejected => VerificationOutcome::Rejected(response),
                VerificationVerdict::Inconclusive => {
                    VerificationOutcome::Unconfirmed(response.status)
                }
            },
        }
    }

    async fn apply_verification_outcome(&self, reference: String, outcome: VerificationOutcome) {
        if self.is_torn_down() {
            debug!(%reference, "subscription_upgrade: verification finished after teardown");
            return;
        }
        if self.flow().pending_reference.as_deref() != Some(reference.as_str()) {
            debug!(%reference, "subscription_upgrade: verification result for settled reference");
            return;
        }

        match outcome {
            VerificationOutcome::Confirmed(response) => {
                self.complete_verified_payment(reference, response).await;
            }
            VerificationOutcome::Rejected(response) => {
                error!(
                    %reference,
                    message = ?response.message,
                    "subscription_upgrade: backend rejected payment"
                );
                self.settle_flow();
                self.publish(
                    UpgradePhase::VerificationFailed {
                        reference,
                        support_message: SUPPORT_MESSAGE.to_string(),
                    },
                    false,
                );
                self.notifier.notify(Toast::error(
                    "Payment verification failed. Please contact support.",
                ));
            }
            VerificationOutcome::Unconfirmed(status) => {
                warn!(
                    %reference,
                    status = %status,
                    "subscription_upgrade: payment not confirmed yet"
                );
                self.await_manual_action(
                    reference,
                    PendingReason::VerificationUnconfirmed(status),
                );
            }
            VerificationOutcome::TimedOut => {
                warn!(%reference, "subscription_upgrade: verification timed out");
                self.await_manual_action(reference, PendingReason::VerificationTimedOut);
            }
            VerificationOutcome::Unreachable(err) => {
                warn!(
                    %reference,
                    error = ?err,
                    "subscription_upgrade: verification request failed"
                );
                self.await_manual_action(reference, PendingReason::VerificationUnreachable);
            }
        }
    }

    async fn complete_verified_payment(&self, reference: String, response: VerifyResponse) {
        let plan = {
            let flow = self.flow();
            response
                .subscription_type
                .or(flow.intent.as_ref().map(|intent| intent.plan))
                .or(flow.selected_plan)
        };
        let Some(plan) = plan else {
            warn!(%reference, "subscription_upgrade: verified payment has no known plan");
            self.await_manual_action(
                reference,
                PendingReason::VerificationUnconfirmed(response.status),
            );
            return;
        };

        self.context.apply_verified_payment(plan, response.credits());
        if let Err(err) = self.context.refresh().await {
            warn!(
                %reference,
                error = ?err,
                "subscription_upgrade: refresh after verification failed"
            );
        }
        if self.is_torn_down() {
            return;
        }

        let credits = response
            .credits()
            .unwrap_or_else(|| self.context.snapshot().remaining_credits);
        let confirmation = UpgradeConfirmation::new(plan, Some(credits));
        info!(
            %reference,
            plan = %plan,
            benefit = %confirmation.benefit,
            "subscription_upgrade: payment verified"
        );

        self.settle_flow();
        self.notifier.notify(Toast::success(format!(
            "Payment successful! {} is now active.",
            confirmation.plan_name
        )));
        self.publish(UpgradePhase::VerifiedSuccess(confirmation), false);
    }

    fn await_manual_action(&self, reference: String, reason: PendingReason) {
        self.notifier.notify(Toast::warning(format!(
            "{}. If you were charged, use the options below to confirm your payment.",
            reason
        )));
        self.publish(
            UpgradePhase::AwaitingManualAction {
                reference: Some(reference),
                reason,
            },
            true,
        );
    }

    /// Re-runs verification for the recorded reference. Safe to call repeatedly.
    pub async fn retry_verification(self: &Arc<Self>) -> UpgradeResult<()> {
        if self.is_torn_down() {
            return Err(UpgradeError::TornDown);
        }
        let reference = self
            .flow()
            .pending_reference
            .clone()
            .ok_or(UpgradeError::NoPendingPayment)?;

        info!(%reference, "subscription_upgrade: manual verification retry");
        self.publish(
            UpgradePhase::Verifying {
                reference: reference.clone(),
            },
            true,
        );
        self.verify_reference(reference).await;
        Ok(())
    }

    /// Asks the backend to reconcile every unconfirmed payment of the user.
    pub async fn verify_pending_payments(&self) -> UpgradeResult<u32> {
        if self.is_torn_down() {
            return Err(UpgradeError::TornDown);
        }
        info!("subscription_upgrade: verifying pending payments");

        let response = self.gateway.verify_pending_payments().await.map_err(|err| {
            error!(error = ?err, "subscription_upgrade: pending payment check failed");
            self.notifier.notify(Toast::error(
                "Could not check pending payments. Please try again.",
            ));
            UpgradeError::Internal(err)
        })?;

        if response.verified_count == 0 {
            info!("subscription_upgrade: no pending payments verified");
            self.notifier.notify(Toast::info(
                response
                    .message
                    .unwrap_or_else(|| "No pending payments found.".to_string()),
            ));
            return Ok(0);
        }

        if let Err(err) = self.context.refresh().await {
            warn!(
                error = ?err,
                "subscription_upgrade: refresh after pending verification failed"
            );
        }
        let snapshot = self.context.snapshot();
        info!(
            verified_count = response.verified_count,
            subscription_type = %snapshot.subscription_type,
            "subscription_upgrade: pending payments verified"
        );

        if self.popup_open() {
            // The open popup's own reference still needs its callback.
            self.notifier.notify(Toast::success(format!(
                "{} earlier payment(s) verified.",
                response.verified_count
            )));
            return Ok(response.verified_count);
        }

        self.settle_flow();
        self.notifier.notify(Toast::success(format!(
            "{} pending payment(s) verified.",
            response.verified_count
        )));
        self.publish(
            UpgradePhase::VerifiedSuccess(UpgradeConfirmation::new(
                snapshot.subscription_type,
                Some(snapshot.remaining_credits),
            )),
            false,
        );
        Ok(response.verified_count)
    }

    /// Re-fetches account status. If it already reflects the plan being bought,
    /// the purchase is treated as verified.
    pub async fn force_refresh(&self) -> UpgradeResult<()> {
        if self.is_torn_down() {
            return Err(UpgradeError::TornDown);
        }
        info!("subscription_upgrade: force refreshing account status");

        let snapshot = self.context.refresh().await.map_err(|err| {
            self.notifier.notify(Toast::error(
                "Could not refresh your account. Please try again.",
            ));
            UpgradeError::Internal(err)
        })?;

        let target = {
            let flow = self.flow();
            flow.pending_reference.as_ref().and(flow.selected_plan)
        };
        let upgraded = target.is_some_and(|plan| {
            snapshot.subscription_type == plan
                && snapshot.can_upload(Utc::now(), self.context.policy())
        });

        if upgraded {
            info!(
                subscription_type = %snapshot.subscription_type,
                "subscription_upgrade: refreshed account already reflects purchase"
            );
            self.settle_flow();
            self.notifier.notify(Toast::success(format!(
                "{} is now active.",
                snapshot.subscription_type.display_name()
            )));
            self.publish(
                UpgradePhase::VerifiedSuccess(UpgradeConfirmation::new(
                    snapshot.subscription_type,
                    Some(snapshot.remaining_credits),
                )),
                false,
            );
        } else {
            self.notifier.notify(Toast::info("Account status refreshed."));
        }

        Ok(())
    }

    /// Leaves the flow and returns where the user chose to go. Leaving while a
    /// payment is unconfirmed keeps it on the backend for a later pending check.
    pub fn acknowledge(&self, action: PostPurchaseAction) -> UpgradeResult<PostPurchaseAction> {
        let phase = self.view.borrow().phase.clone();
        match phase {
            UpgradePhase::VerifiedSuccess(_)
            | UpgradePhase::VerificationFailed { .. }
            | UpgradePhase::Idle => {}
            UpgradePhase::AwaitingManualAction { reference, .. } => {
                warn!(
                    reference = ?reference,
                    "subscription_upgrade: leaving flow with unconfirmed payment"
                );
                self.settle_flow();
                self.notifier.notify(Toast::info(
                    "You can confirm this payment later from your account page.",
                ));
            }
            UpgradePhase::PricingFetched { .. }
            | UpgradePhase::PaymentInitiated { .. }
            | UpgradePhase::Verifying { .. } => return Err(UpgradeError::UpgradeInProgress),
        }

        info!(action = ?action, "subscription_upgrade: flow acknowledged");
        self.flow().selected_plan = None;
        self.publish(UpgradePhase::Idle, false);
        Ok(action)
    }

    /// Stops timers and listeners. Later callbacks and results are ignored.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_emergency_timer();
        self.stop_event_pump();
        info!("subscription_upgrade: torn down");
    }

    fn popup_open(&self) -> bool {
        let flow = self.flow();
        flow.starting || (flow.intent.is_some() && flow.pending_reference.is_none())
    }

    fn settle_flow(&self) {
        let mut flow = self.flow();
        flow.intent = None;
        flow.session_reference = None;
        flow.pending_reference = None;
    }

    fn arm_emergency_timer(self: &Arc<Self>) {
        let mut slot = self.emergency_timer_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let this = Arc::downgrade(self);
        let delay = self.settings.timings.emergency_actions_after;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = this.upgrade() {
                this.reveal_manual_actions();
            }
        }));
    }

    fn cancel_emergency_timer(&self) {
        if let Some(handle) = self.emergency_timer_slot().take() {
            handle.abort();
        }
    }

    fn reveal_manual_actions(&self) {
        if self.is_torn_down() {
            return;
        }
        let revealed = self.view.send_if_modified(|view| {
            if view.is_loading() && !view.manual_actions_visible {
                view.manual_actions_visible = true;
                true
            } else {
                false
            }
        });
        if revealed {
            warn!("subscription_upgrade: verification still running, showing manual actions");
        }
    }

    fn publish(&self, phase: UpgradePhase, manual_actions_visible: bool) {
        if self.is_torn_down() {
            return;
        }
        if !phase.is_loading() {
            self.cancel_emergency_timer();
        }
        debug!(phase = phase.name(), manual_actions_visible, "subscription_upgrade: view updated");
        self.view.send_replace(UpgradeView {
            phase,
            manual_actions_visible,
        });
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn flow(&self) -> MutexGuard<'_, FlowState> {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn verifying_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.verifying.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emergency_timer_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.emergency_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn event_pump_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.event_pump.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<G, W, N> Drop for SubscriptionUpgradeUseCase<G, W, N>
where
    G: PaymentsGateway + 'static,
    W: PaymentWidget + 'static,
    N: Notifier + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        entities::subscriptions::SubscriptionSnapshot,
        repositories::{
            notifications::MockNotifier, payment_widget::MockPaymentWidget,
            payments::MockPaymentsGateway,
        },
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus,
            notifications::ToastLevel,
            payments::{UpgradeResponse, VerifyPendingResponse},
            pricing::{PlanPricing, PricingCatalog},
            upload_policy::FreeTierUploadPolicy,
        },
    };
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::{collections::HashMap, sync::atomic::AtomicUsize};

    const PLACEHOLDER: &str = "customer@tunedrop.app";

    #[derive(Default)]
    struct RecordingNotifier {
        toasts: Mutex<Vec<Toast>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, toast: Toast) {
            self.toasts.lock().unwrap().push(toast);
        }
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.toasts
                .lock()
                .unwrap()
                .iter()
                .map(|toast| toast.message.clone())
                .collect()
        }
    }

    /// Backend whose verification endpoint never answers.
    struct HangingGateway;

    #[async_trait]
    impl PaymentsGateway for HangingGateway {
        async fn fetch_pricing(&self) -> Result<PricingCatalog> {
            Ok(catalog())
        }

        async fn create_upgrade(&self, _request: UpgradeRequest) -> Result<UpgradeResponse> {
            Ok(UpgradeResponse {
                reference: "hang-1".to_string(),
                amount: 25000.0,
            })
        }

        async fn verify_payment(&self, _reference: &str) -> Result<VerifyResponse> {
            std::future::pending().await
        }

        async fn verify_pending_payments(&self) -> Result<VerifyPendingResponse> {
            Ok(VerifyPendingResponse::default())
        }

        async fn current_subscription(&self) -> Result<SubscriptionSnapshot> {
            Ok(SubscriptionSnapshot::free())
        }
    }

    /// Backend where `ref-0` never verifies and any other reference
    /// activates the yearly plan.
    struct StuckFirstPaymentGateway {
        references: Mutex<Vec<&'static str>>,
        account: Arc<Mutex<SubscriptionSnapshot>>,
        verified: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PaymentsGateway for StuckFirstPaymentGateway {
        async fn fetch_pricing(&self) -> Result<PricingCatalog> {
            Ok(catalog())
        }

        async fn create_upgrade(&self, _request: UpgradeRequest) -> Result<UpgradeResponse> {
            let reference = self.references.lock().unwrap().remove(0);
            Ok(UpgradeResponse {
                reference: reference.to_string(),
                amount: 5000.0,
            })
        }

        async fn verify_payment(&self, reference: &str) -> Result<VerifyResponse> {
            if reference == "ref-0" {
                return std::future::pending().await;
            }
            self.verified.lock().unwrap().push(reference.to_string());
            *self.account.lock().unwrap() = yearly();
            Ok(verified(None, Some(SubscriptionType::Yearly)))
        }

        async fn verify_pending_payments(&self) -> Result<VerifyPendingResponse> {
            Ok(VerifyPendingResponse::default())
        }

        async fn current_subscription(&self) -> Result<SubscriptionSnapshot> {
            Ok(self.account.lock().unwrap().clone())
        }
    }

    fn settings() -> UpgradeSettings {
        UpgradeSettings {
            widget_public_key: "pk_test_123".to_string(),
            currency: "NGN".to_string(),
            placeholder_email: PLACEHOLDER.to_string(),
            auto_renew: false,
            timings: UpgradeTimings::default(),
        }
    }

    fn artist(email: Option<&str>) -> AuthUser {
        AuthUser {
            username: "artist".to_string(),
            email: email.map(str::to_string),
        }
    }

    fn catalog() -> PricingCatalog {
        PricingCatalog {
            subscriptions: HashMap::from([
                (
                    "pay_per_song".to_string(),
                    PlanPricing {
                        amount: 5000.0,
                        currency: None,
                        credits: Some(1),
                    },
                ),
                (
                    "yearly".to_string(),
                    PlanPricing {
                        amount: 25000.0,
                        currency: None,
                        credits: None,
                    },
                ),
            ]),
        }
    }

    fn pay_per_song(credits: u32) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_type: SubscriptionType::PayPerSong,
            status: SubscriptionStatus::Active,
            remaining_credits: credits,
            end_date: None,
        }
    }

    fn yearly() -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_type: SubscriptionType::Yearly,
            status: SubscriptionStatus::Active,
            remaining_credits: 0,
            end_date: Some(Utc::now() + ChronoDuration::days(365)),
        }
    }

    fn verified(credits: Option<u32>, plan: Option<SubscriptionType>) -> VerifyResponse {
        VerifyResponse {
            status: VerificationStatus::Success,
            subscription_type: plan,
            remaining_credits: credits,
            song_credits: None,
            message: None,
        }
    }

    fn success(reference: &str) -> WidgetTransaction {
        WidgetTransaction {
            reference: reference.to_string(),
            status: Some("success".to_string()),
            trans: Some("4099260516".to_string()),
        }
    }

    /// Keeps the callbacks alive the way an open popup does.
    fn hold_callbacks()
    -> impl FnMut(WidgetSession, WidgetCallbacks) -> Result<()> + Send + 'static {
        let mut held = Vec::new();
        move |_, callbacks| {
            held.push(callbacks);
            Ok(())
        }
    }

    fn loaded_widget() -> MockPaymentWidget {
        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(true);
        widget.expect_open().returning(hold_callbacks());
        widget
    }

    fn permissive_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().return_const(());
        notifier
    }

    fn gateway_with_intent(reference: &'static str, amount: f64) -> MockPaymentsGateway {
        let mut gateway = MockPaymentsGateway::new();
        gateway
            .expect_fetch_pricing()
            .times(1)
            .returning(|| Ok(catalog()));
        gateway
            .expect_create_upgrade()
            .times(1)
            .returning(move |_| {
                Ok(UpgradeResponse {
                    reference: reference.to_string(),
                    amount,
                })
            });
        gateway
    }

    fn build<G, N>(
        gateway: G,
        widget: MockPaymentWidget,
        notifier: Arc<N>,
        user: AuthUser,
    ) -> Arc<SubscriptionUpgradeUseCase<G, MockPaymentWidget, N>>
    where
        G: PaymentsGateway + 'static,
        N: Notifier + 'static,
    {
        let gateway = Arc::new(gateway);
        let context = Arc::new(SubscriptionContext::new(
            Arc::clone(&gateway),
            FreeTierUploadPolicy::Deny,
        ));
        Arc::new(SubscriptionUpgradeUseCase::new(
            gateway,
            Arc::new(widget),
            notifier,
            context,
            user,
            settings(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn pay_per_song_purchase_shows_credit_confirmation() {
        let mut gateway = MockPaymentsGateway::new();
        gateway
            .expect_fetch_pricing()
            .times(1)
            .returning(|| Ok(catalog()));
        gateway
            .expect_create_upgrade()
            .withf(|request| {
                request.subscription_type == SubscriptionType::PayPerSong && !request.auto_renew
            })
            .times(1)
            .returning(|_| {
                Ok(UpgradeResponse {
                    reference: "abc123".to_string(),
                    amount: 5000.0,
                })
            });
        gateway
            .expect_verify_payment()
            .withf(|reference| reference == "abc123")
            .times(1)
            .returning(|_| Ok(verified(Some(3), None)));
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(pay_per_song(3)));

        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(true);
        widget
            .expect_open()
            .withf(|session, _| {
                session.key == "pk_test_123"
                    && session.email == "ada@example.com"
                    && session.amount_minor == 500_000
                    && session.currency == "NGN"
                    && session.reference == "abc123"
            })
            .times(1)
            .returning(hold_callbacks());

        let coordinator = build(
            gateway,
            widget,
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );

        let intent = coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        assert_eq!(intent.reference, "abc123");
        assert!(coordinator.view().is_loading());
        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::PaymentInitiated { .. }
        ));

        coordinator.on_payment_success(success("abc123")).await;

        let view = coordinator.view();
        let UpgradePhase::VerifiedSuccess(confirmation) = view.phase else {
            panic!("expected verified success, got {:?}", view.phase);
        };
        assert_eq!(confirmation.plan_name, "Pay Per Song");
        assert_eq!(confirmation.benefit, "3 upload credit(s)");
        assert!(!view.manual_actions_visible);
        assert_eq!(coordinator.context().snapshot().remaining_credits, 3);
        assert!(coordinator.context().can_upload());
    }

    #[tokio::test(start_paused = true)]
    async fn yearly_purchase_shows_unlimited_confirmation() {
        let mut gateway = gateway_with_intent("yr-1", 25000.0);
        gateway
            .expect_verify_payment()
            .times(1)
            .returning(|_| Ok(verified(None, Some(SubscriptionType::Yearly))));
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(yearly()));

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );

        coordinator
            .start_upgrade(SubscriptionType::Yearly)
            .await
            .unwrap();
        coordinator.on_payment_success(success("yr-1")).await;

        let UpgradePhase::VerifiedSuccess(confirmation) = coordinator.view().phase else {
            panic!("expected verified success");
        };
        assert_eq!(confirmation.plan_name, "Yearly Premium");
        assert_eq!(confirmation.benefit, "Unlimited uploads for one year");
        assert_eq!(
            coordinator.context().snapshot().subscription_type,
            SubscriptionType::Yearly
        );
        assert_eq!(
            notifier.messages(),
            vec!["Payment successful! Yearly Premium is now active.".to_string()]
        );
    }

    #[tokio::test]
    async fn closing_before_success_cancels_without_verifying() {
        let gateway = gateway_with_intent("abc123", 5000.0);

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|toast| toast.level == ToastLevel::Info && toast.message == "Payment cancelled")
            .times(1)
            .return_const(());

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(notifier),
            artist(Some("ada@example.com")),
        );

        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        assert!(coordinator.view().is_loading());

        coordinator.on_popup_closed();
        assert_eq!(coordinator.view(), UpgradeView::default());
        assert!(!coordinator.view().is_loading());

        // A second close for the same popup is not a second cancellation.
        coordinator.on_popup_closed();
        assert_eq!(coordinator.view().phase, UpgradePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_success_verifies_once() {
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        gateway
            .expect_verify_payment()
            .times(1)
            .returning(|_| Ok(verified(Some(1), Some(SubscriptionType::PayPerSong))));
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(pay_per_song(1)));

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        tokio::join!(
            coordinator.on_payment_success(success("abc123")),
            coordinator.on_payment_success(success("abc123")),
        );
        coordinator.on_popup_closed();
        coordinator.on_payment_success(success("abc123")).await;

        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::VerifiedSuccess(_)
        ));
        assert!(!notifier.messages().contains(&"Payment cancelled".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn widget_callbacks_drive_the_flow() {
        let verify_calls = Arc::new(AtomicUsize::new(0));
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        let calls = Arc::clone(&verify_calls);
        gateway.expect_verify_payment().returning(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(verified(Some(2), Some(SubscriptionType::PayPerSong)))
        });
        gateway
            .expect_current_subscription()
            .returning(|| Ok(pay_per_song(2)));

        let captured: Arc<Mutex<Option<WidgetCallbacks>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&captured);
        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(true);
        widget.expect_open().returning(move |_, callbacks| {
            *slot.lock().unwrap() = Some(callbacks);
            Ok(())
        });

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            gateway,
            widget,
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        let callbacks = captured.lock().unwrap().take().unwrap();
        // Some widget builds fire close right after success, sometimes twice.
        assert!(callbacks.success(success("abc123")));
        assert!(callbacks.closed());
        assert!(callbacks.success(success("abc123")));
        assert!(callbacks.closed());

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(verify_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::VerifiedSuccess(_)
        ));
        assert!(!notifier.messages().contains(&"Payment cancelled".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_verification_ends_in_manual_action() {
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            HangingGateway,
            loaded_widget(),
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::Yearly)
            .await
            .unwrap();

        let verifying = Arc::clone(&coordinator);
        let task = tokio::spawn(async move {
            verifying.on_payment_success(success("hang-1")).await;
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        let view = coordinator.view();
        assert!(matches!(view.phase, UpgradePhase::Verifying { .. }));
        assert!(view.manual_actions_visible);

        tokio::time::sleep(Duration::from_secs(20)).await;
        task.await.unwrap();

        let view = coordinator.view();
        assert_eq!(
            view.phase,
            UpgradePhase::AwaitingManualAction {
                reference: Some("hang-1".to_string()),
                reason: PendingReason::VerificationTimedOut,
            }
        );
        assert!(view.manual_actions_visible);
        assert!(!view.is_loading());
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_retry_verifies_after_network_error() {
        let verify_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&verify_calls);
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        gateway.expect_verify_payment().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow!("connection reset by peer"))
            } else {
                Ok(verified(Some(1), Some(SubscriptionType::PayPerSong)))
            }
        });
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(pay_per_song(1)));

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        coordinator.on_payment_success(success("abc123")).await;

        assert_eq!(
            coordinator.view().phase,
            UpgradePhase::AwaitingManualAction {
                reference: Some("abc123".to_string()),
                reason: PendingReason::VerificationUnreachable,
            }
        );
        assert!(matches!(
            coordinator.start_upgrade(SubscriptionType::Yearly).await,
            Err(UpgradeError::UpgradeInProgress)
        ));

        coordinator.retry_verification().await.unwrap();

        assert_eq!(verify_calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::VerifiedSuccess(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_failure_points_to_support_without_retrying() {
        let mut gateway = gateway_with_intent("bad-1", 5000.0);
        gateway.expect_verify_payment().times(1).returning(|_| {
            Ok(VerifyResponse {
                status: VerificationStatus::Failed,
                subscription_type: None,
                remaining_credits: None,
                song_credits: None,
                message: Some("Card declined".to_string()),
            })
        });

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        coordinator.on_payment_success(success("bad-1")).await;

        assert_eq!(
            coordinator.view().phase,
            UpgradePhase::VerificationFailed {
                reference: "bad-1".to_string(),
                support_message: SUPPORT_MESSAGE.to_string(),
            }
        );
        assert!(matches!(
            coordinator.retry_verification().await,
            Err(UpgradeError::NoPendingPayment)
        ));

        let action = coordinator
            .acknowledge(PostPurchaseAction::GoToDashboard)
            .unwrap();
        assert_eq!(action, PostPurchaseAction::GoToDashboard);
        assert_eq!(coordinator.view().phase, UpgradePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_payment_check_settles_unconfirmed_payment() {
        let mut gateway = gateway_with_intent("slow-1", 25000.0);
        gateway.expect_verify_payment().times(1).returning(|_| {
            Ok(VerifyResponse {
                status: VerificationStatus::Pending,
                subscription_type: None,
                remaining_credits: None,
                song_credits: None,
                message: None,
            })
        });
        gateway
            .expect_verify_pending_payments()
            .times(1)
            .returning(|| {
                Ok(VerifyPendingResponse {
                    verified_count: 1,
                    message: None,
                })
            });
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(yearly()));

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::Yearly)
            .await
            .unwrap();
        coordinator.on_payment_success(success("slow-1")).await;

        assert_eq!(
            coordinator.view().phase,
            UpgradePhase::AwaitingManualAction {
                reference: Some("slow-1".to_string()),
                reason: PendingReason::VerificationUnconfirmed(VerificationStatus::Pending),
            }
        );

        assert_eq!(coordinator.verify_pending_payments().await.unwrap(), 1);

        let UpgradePhase::VerifiedSuccess(confirmation) = coordinator.view().phase else {
            panic!("expected verified success");
        };
        assert_eq!(confirmation.plan, SubscriptionType::Yearly);
        assert!(coordinator.context().can_upload());
    }

    #[tokio::test]
    async fn pending_payment_check_with_nothing_found_keeps_state() {
        let mut gateway = MockPaymentsGateway::new();
        gateway
            .expect_verify_pending_payments()
            .times(2)
            .returning(|| Ok(VerifyPendingResponse::default()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|toast| toast.message == "No pending payments found.")
            .times(2)
            .return_const(());

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(notifier),
            artist(Some("ada@example.com")),
        );

        assert_eq!(coordinator.verify_pending_payments().await.unwrap(), 0);
        assert_eq!(coordinator.verify_pending_payments().await.unwrap(), 0);
        assert_eq!(coordinator.view().phase, UpgradePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_recognises_completed_purchase() {
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        gateway
            .expect_verify_payment()
            .times(1)
            .returning(|_| Err(anyhow!("gateway timeout")));
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(pay_per_song(2)));

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        coordinator.on_payment_success(success("abc123")).await;
        assert!(coordinator.view().manual_actions_visible);

        coordinator.force_refresh().await.unwrap();

        let UpgradePhase::VerifiedSuccess(confirmation) = coordinator.view().phase else {
            panic!("expected verified success");
        };
        assert_eq!(confirmation.benefit, "2 upload credit(s)");
        assert!(!coordinator.view().manual_actions_visible);
    }

    #[tokio::test]
    async fn missing_widget_fails_before_any_backend_call() {
        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(false);
        widget.expect_open().never();

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|toast| toast.level == ToastLevel::Error)
            .times(1)
            .return_const(());

        let coordinator = build(
            MockPaymentsGateway::new(),
            widget,
            Arc::new(notifier),
            artist(Some("ada@example.com")),
        );

        let result = coordinator.start_upgrade(SubscriptionType::Yearly).await;
        assert!(matches!(result, Err(UpgradeError::WidgetUnavailable)));
        assert_eq!(coordinator.view().phase, UpgradePhase::Idle);
    }

    #[tokio::test]
    async fn missing_pricing_fails_closed() {
        let mut gateway = MockPaymentsGateway::new();
        gateway.expect_fetch_pricing().times(1).returning(|| {
            Ok(PricingCatalog {
                subscriptions: HashMap::new(),
            })
        });
        gateway.expect_create_upgrade().never();

        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(true);
        widget.expect_open().never();

        let coordinator = build(
            gateway,
            widget,
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );

        let result = coordinator.start_upgrade(SubscriptionType::Yearly).await;
        assert!(matches!(
            result,
            Err(UpgradeError::PricingUnavailable(SubscriptionType::Yearly))
        ));
        assert_eq!(coordinator.view().phase, UpgradePhase::Idle);
    }

    #[tokio::test]
    async fn current_and_free_plans_cannot_be_bought() {
        let coordinator = build(
            MockPaymentsGateway::new(),
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .context()
            .apply_verified_payment(SubscriptionType::Yearly, None);

        assert!(matches!(
            coordinator.start_upgrade(SubscriptionType::Yearly).await,
            Err(UpgradeError::AlreadyOnPlan(SubscriptionType::Yearly))
        ));
        assert!(matches!(
            coordinator.start_upgrade(SubscriptionType::Free).await,
            Err(UpgradeError::NotPurchasable(SubscriptionType::Free))
        ));
    }

    #[tokio::test]
    async fn second_upgrade_is_rejected_while_popup_is_open() {
        let coordinator = build(
            gateway_with_intent("abc123", 5000.0),
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );

        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        assert!(matches!(
            coordinator.start_upgrade(SubscriptionType::Yearly).await,
            Err(UpgradeError::UpgradeInProgress)
        ));
    }

    #[tokio::test]
    async fn malformed_email_uses_placeholder() {
        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(true);
        widget
            .expect_open()
            .withf(|session, _| session.email == PLACEHOLDER)
            .times(1)
            .returning(hold_callbacks());

        let coordinator = build(
            gateway_with_intent("abc123", 5000.0),
            widget,
            Arc::new(permissive_notifier()),
            artist(Some("not-an-email")),
        );

        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_cancel_is_still_verified() {
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        gateway
            .expect_verify_payment()
            .times(1)
            .returning(|_| Ok(verified(Some(1), None)));
        gateway
            .expect_current_subscription()
            .times(1)
            .returning(|| Ok(pay_per_song(1)));

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        coordinator.on_popup_closed();
        coordinator.on_payment_success(success("abc123")).await;

        let UpgradePhase::VerifiedSuccess(confirmation) = coordinator.view().phase else {
            panic!("expected verified success");
        };
        assert_eq!(confirmation.plan, SubscriptionType::PayPerSong);
        assert_eq!(notifier.messages()[0], "Payment cancelled");
    }

    #[tokio::test]
    async fn teardown_silences_late_callbacks() {
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            gateway_with_intent("abc123", 5000.0),
            loaded_widget(),
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        coordinator.teardown();
        coordinator.on_popup_closed();
        coordinator.on_payment_success(success("abc123")).await;

        assert!(notifier.messages().is_empty());
        assert!(matches!(
            coordinator.start_upgrade(SubscriptionType::Yearly).await,
            Err(UpgradeError::TornDown)
        ));
        assert!(matches!(
            coordinator.force_refresh().await,
            Err(UpgradeError::TornDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_with_unconfirmed_payment_allows_new_purchase_later() {
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        gateway
            .expect_verify_payment()
            .times(1)
            .returning(|_| Err(anyhow!("service unavailable")));

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
        coordinator.on_payment_success(success("abc123")).await;

        coordinator
            .acknowledge(PostPurchaseAction::GoToDashboard)
            .unwrap();
        assert_eq!(coordinator.view(), UpgradeView::default());
        assert!(matches!(
            coordinator.retry_verification().await,
            Err(UpgradeError::NoPendingPayment)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_widget_callbacks_count_as_close() {
        let mut gateway = MockPaymentsGateway::new();
        gateway
            .expect_fetch_pricing()
            .times(2)
            .returning(|| Ok(catalog()));
        gateway.expect_create_upgrade().times(2).returning(|_| {
            Ok(UpgradeResponse {
                reference: "gone-1".to_string(),
                amount: 5000.0,
            })
        });
        gateway.expect_verify_payment().never();

        // The popup goes away without ever reporting close.
        let mut widget = MockPaymentWidget::new();
        widget.expect_is_loaded().return_const(true);
        widget.expect_open().times(2).returning(|_, _| Ok(()));

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = build(
            gateway,
            widget,
            Arc::clone(&notifier),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(coordinator.view(), UpgradeView::default());
        assert_eq!(notifier.messages(), vec!["Payment cancelled".to_string()]);
        assert!(
            coordinator
                .acknowledge(PostPurchaseAction::GoToDashboard)
                .is_ok()
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_verification_does_not_block_the_next_purchase() {
        let account = Arc::new(Mutex::new(SubscriptionSnapshot::free()));
        let verified_refs = Arc::new(Mutex::new(Vec::new()));
        let gateway = StuckFirstPaymentGateway {
            references: Mutex::new(vec!["ref-0", "ref-1"]),
            account: Arc::clone(&account),
            verified: Arc::clone(&verified_refs),
        };

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        let stuck = Arc::clone(&coordinator);
        let first = tokio::spawn(async move {
            stuck.on_payment_success(success("ref-0")).await;
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(coordinator.view().manual_actions_visible);

        // The backend's webhook landed even though verification never answered.
        *account.lock().unwrap() = pay_per_song(1);
        coordinator.force_refresh().await.unwrap();
        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::VerifiedSuccess(_)
        ));

        coordinator
            .start_upgrade(SubscriptionType::Yearly)
            .await
            .unwrap();
        coordinator.on_payment_success(success("ref-1")).await;

        assert_eq!(*verified_refs.lock().unwrap(), vec!["ref-1".to_string()]);
        let UpgradePhase::VerifiedSuccess(confirmation) = coordinator.view().phase else {
            panic!("expected verified success");
        };
        assert_eq!(confirmation.plan, SubscriptionType::Yearly);

        // The stuck call eventually times out and must not disturb the result.
        tokio::time::sleep(Duration::from_secs(40)).await;
        first.await.unwrap();
        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::VerifiedSuccess(_)
        ));
        assert!(!coordinator.view().manual_actions_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_check_keeps_the_open_popup_verifiable() {
        let mut gateway = gateway_with_intent("abc123", 5000.0);
        gateway
            .expect_verify_pending_payments()
            .times(1)
            .returning(|| {
                Ok(VerifyPendingResponse {
                    verified_count: 1,
                    message: None,
                })
            });
        gateway
            .expect_current_subscription()
            .returning(|| Ok(pay_per_song(1)));
        gateway
            .expect_verify_payment()
            .withf(|reference| reference == "abc123")
            .times(1)
            .returning(|_| Ok(verified(Some(2), Some(SubscriptionType::PayPerSong))));

        let coordinator = build(
            gateway,
            loaded_widget(),
            Arc::new(permissive_notifier()),
            artist(Some("ada@example.com")),
        );
        coordinator
            .start_upgrade(SubscriptionType::PayPerSong)
            .await
            .unwrap();

        assert_eq!(coordinator.verify_pending_payments().await.unwrap(), 1);
        assert!(matches!(
            coordinator.view().phase,
            UpgradePhase::PaymentInitiated { .. }
        ));

        coordinator.on_payment_success(success("abc123")).await;

        let UpgradePhase::VerifiedSuccess(confirmation) = coordinator.view().phase else {
            panic!("expected verified success");
        };
        assert_eq!(confirmation.benefit, "2 upload credit(s)");
    }
}
