pub mod notifications;
pub mod payment_widget;
pub mod payments;
