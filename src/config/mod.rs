//! # Configuration Management
//!
//! Settings for each backend are resolved from the endpoint list handed to the
//! connector plus a handful of environment variables. Every `from_env`
//! constructor has a `from_lookup` twin that takes the variable source as a
//! closure.

pub mod settings;

pub use settings::{
    ConsulSettings, RenewalConfig, VaultAuth, VaultSettings, WatchConfig, CONSUL_TOKEN_ENV,
    DEFAULT_APPROLE_MOUNT, DEFAULT_VAULT_ADDRESS, VAULT_ADDR_ENV, VAULT_NAMESPACE_ENV,
    VAULT_ROLE_ID_ENV, VAULT_SECRET_ID_ENV, VAULT_TOKEN_ENV,
};

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
