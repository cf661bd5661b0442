use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{
    repositories::payment_widget::{PaymentWidget, WidgetCallbacks},
    value_objects::upgrade::{WidgetSession, WidgetTransaction},
};

/// One popup the host should open with `PaystackPop.setup(setup)`.
#[derive(Debug)]
pub struct PaystackLaunch {
    pub setup: Value,
    callbacks: WidgetCallbacks,
}

impl PaystackLaunch {
    /// Forwards the raw `callback` payload of the inline script.
    pub fn on_success(&self, payload: &str) -> Result<bool> {
        let transaction: WidgetTransaction =
            serde_json::from_str(payload).context("invalid paystack callback payload")?;
        Ok(self.callbacks.success(transaction))
    }

    /// Forwards the inline script's `onClose`.
    pub fn on_close(&self) -> bool {
        self.callbacks.closed()
    }
}

/// Paystack inline checkout rendered by an embedding host (web view, desktop shell).
///
/// The host drains [`PaystackLaunch`] requests from the receiver returned by
/// [`PaystackInlineWidget::new`]. Dropping the receiver marks the widget as
/// unavailable.
pub struct PaystackInlineWidget {
    host: mpsc::UnboundedSender<PaystackLaunch>,
}

impl PaystackInlineWidget {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PaystackLaunch>) {
        let (host, rx) = mpsc::unbounded_channel();
        (Self { host }, rx)
    }

    pub fn setup_options(session: &WidgetSession) -> Value {
        json!({
            "key": session.key,
            "email": session.email,
            "amount": session.amount_minor,
            "currency": session.currency,
            "ref": session.reference,
        })
    }
}

impl PaymentWidget for PaystackInlineWidget {
    fn is_loaded(&self) -> bool {
        !self.host.is_closed()
    }

    fn open(&self, session: WidgetSession, callbacks: WidgetCallbacks) -> Result<()> {
        if session.key.trim().is_empty() {
            bail!("paystack public key is not configured");
        }

        let reference = session.reference.clone();
        let launch = PaystackLaunch {
            setup: Self::setup_options(&session),
            callbacks,
        };

        if self.host.send(launch).is_err() {
            warn!(%reference, "paystack_widget: host is not listening");
            bail!("paystack host is not available");
        }

        info!(%reference, "paystack_widget: popup requested");
        Ok(())
    }
}
