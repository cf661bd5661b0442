pub mod subscription_context;
pub mod subscription_upgrade;
