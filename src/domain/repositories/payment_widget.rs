use anyhow::Result;
use tokio::sync::mpsc;

use crate::domain::value_objects::upgrade::{WidgetEvent, WidgetSession, WidgetTransaction};

/// Hook handed to the widget for one session. `success` and `closed` may fire
/// in either order and more than once.
#[derive(Debug, Clone)]
pub struct WidgetCallbacks {
    tx: mpsc::UnboundedSender<WidgetEvent>,
}

impl WidgetCallbacks {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WidgetEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the coordinator has stopped listening.
    pub fn success(&self, transaction: WidgetTransaction) -> bool {
        self.tx.send(WidgetEvent::Success(transaction)).is_ok()
    }

    pub fn closed(&self) -> bool {
        self.tx.send(WidgetEvent::Closed).is_ok()
    }
}

/// Third-party payment popup.
#[cfg_attr(test, mockall::automock)]
pub trait PaymentWidget: Send + Sync {
    /// False when the widget script or host is unavailable.
    fn is_loaded(&self) -> bool;

    fn open(&self, session: WidgetSession, callbacks: WidgetCallbacks) -> Result<()>;
}
