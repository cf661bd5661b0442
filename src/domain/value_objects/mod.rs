pub mod badges;
pub mod enums;
pub mod notifications;
pub mod payments;
pub mod pricing;
pub mod upgrade;
pub mod upload_policy;
