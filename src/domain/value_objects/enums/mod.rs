pub mod subscription_statuses;
pub mod subscription_types;
pub mod verification_statuses;
