use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// The signed-in user plus the bearer token sent with every API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub user: AuthUser,
}

/// Address handed to the payment widget, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutEmail {
    Account(String),
    Placeholder(String),
}

impl CheckoutEmail {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, CheckoutEmail::Placeholder(_))
    }

    pub fn into_address(self) -> String {
        match self {
            CheckoutEmail::Account(address) | CheckoutEmail::Placeholder(address) => address,
        }
    }
}

impl AuthUser {
    /// Falls back to `placeholder` when the account has no usable address.
    pub fn checkout_email(&self, placeholder: &str) -> CheckoutEmail {
        match self.email.as_deref().map(str::trim) {
            Some(email) if is_plausible_email(email) => CheckoutEmail::Account(email.to_string()),
            _ => CheckoutEmail::Placeholder(placeholder.to_string()),
        }
    }
}

fn is_plausible_email(value: &str) -> bool {
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }

    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
