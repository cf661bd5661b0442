use tracing::{error, info, warn};

use crate::domain::{
    repositories::notifications::Notifier,
    value_objects::notifications::{Toast, ToastLevel},
};

/// Writes toasts to the log. Used where no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Success | ToastLevel::Info => {
                info!(level = %toast.level, "toast: {}", toast.message)
            }
            ToastLevel::Warning => warn!(level = %toast.level, "toast: {}", toast.message),
            ToastLevel::Error => error!(level = %toast.level, "toast: {}", toast.message),
        }
    }
}
