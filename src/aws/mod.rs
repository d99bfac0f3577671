use chrono::{DateTime, Utc};

pub mod alias;
pub mod broker;
pub mod credentials;
pub mod roles;
pub mod sts;

/// AWS temporary credentials structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl Credentials {
    /// Whether the credentials stay valid for at least `min_remaining_seconds` after `now`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, min_remaining_seconds: i64) -> bool {
        (self.expiration - now).num_seconds() > min_remaining_seconds
    }
}

// Re-export commonly used types (functions should be accessed via module path)
pub use alias::{AliasMap, AliasResolver};
pub use broker::{BrokerConfig, CredentialBroker};
pub use roles::{RoleBinding, RoleMap};
pub use sts::{AssumeRoleRequest, TokenError, TokenService};
