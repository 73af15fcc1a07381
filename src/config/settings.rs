//! # Configuration Settings
//!
//! Backend settings resolved from an endpoint list and the process environment.

use crate::credentials::SecretString;
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Environment variable holding the AppRole role identifier.
pub const VAULT_ROLE_ID_ENV: &str = "VAULT_ROLE_ID";
/// Environment variable holding the AppRole secret identifier.
pub const VAULT_SECRET_ID_ENV: &str = "VAULT_SECRET_ID";
/// Environment variable holding a static, long-lived Vault token.
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
/// Environment variable consulted when no Vault endpoint is supplied.
pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
/// Optional Vault Enterprise namespace.
pub const VAULT_NAMESPACE_ENV: &str = "VAULT_NAMESPACE";
/// Optional Consul ACL token.
pub const CONSUL_TOKEN_ENV: &str = "CONSUL_HTTP_TOKEN";

/// Address used when neither an endpoint nor `VAULT_ADDR` is given.
pub const DEFAULT_VAULT_ADDRESS: &str = "https://127.0.0.1:8200";
/// Mount path of the AppRole auth method.
pub const DEFAULT_APPROLE_MOUNT: &str = "approle";

/// Watch engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WatchConfig {
    /// Delay before polling again after a failed cycle
    #[validate(range(min = 1, max = 3600, message = "Backoff must be between 1 and 3600 seconds"))]
    pub backoff_seconds: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { backoff_seconds: 5 }
    }
}

impl WatchConfig {
    /// Get the failure backoff as Duration
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }
}

/// Credential renewal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RenewalConfig {
    /// Delay before restarting the renewal watcher when re-login fails
    #[validate(range(min = 1, message = "Re-login backoff must be at least 1 second"))]
    pub relogin_backoff_seconds: u64,

    /// Remaining lease below which the credential is treated as exhausted
    pub grace_seconds: u64,

    /// Requested lease extension per renewal (None = the login lease duration)
    pub increment_seconds: Option<u64>,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self { relogin_backoff_seconds: 5, grace_seconds: 5, increment_seconds: None }
    }
}

impl RenewalConfig {
    pub fn relogin_backoff(&self) -> Duration {
        Duration::from_secs(self.relogin_backoff_seconds)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    pub fn increment(&self) -> Option<Duration> {
        self.increment_seconds.map(Duration::from_secs)
    }
}

/// How the Vault backend authenticates.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultAuth {
    /// Exchange a role and secret identifier for a renewable session token.
    AppRole { role_id: String, secret_id: SecretString, mount: String },
    /// Use a fixed token with no renewal.
    Token(SecretString),
}

impl VaultAuth {
    /// Resolve the auth method from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Resolve the auth method through `lookup`.
    ///
    /// A role identifier wins over a static token; with neither present the
    /// method is unknown.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role_id) = non_empty(lookup(VAULT_ROLE_ID_ENV)) {
            let secret_id = lookup(VAULT_SECRET_ID_ENV).unwrap_or_default();
            return Ok(Self::AppRole {
                role_id,
                secret_id: SecretString::new(secret_id),
                mount: DEFAULT_APPROLE_MOUNT.to_string(),
            });
        }

        if let Some(token) = non_empty(lookup(VAULT_TOKEN_ENV)) {
            return Ok(Self::Token(SecretString::new(token)));
        }

        Err(Error::UnknownAuthMethod)
    }

    /// Short label for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::AppRole { .. } => "approle",
            Self::Token(_) => "token",
        }
    }
}

/// Vault backend configuration
#[derive(Debug, Clone)]
pub struct VaultSettings {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// Authentication method
    pub auth: VaultAuth,

    /// Watch engine configuration
    pub watch: WatchConfig,

    /// Session renewal configuration (AppRole only)
    pub renewal: RenewalConfig,
}

impl VaultSettings {
    /// Build settings from an endpoint list and the process environment.
    pub fn from_env(machines: &[String]) -> Result<Self> {
        Self::from_lookup(machines, env_lookup)
    }

    /// Build settings from an endpoint list and `lookup`.
    ///
    /// The first endpoint is authoritative and the rest are ignored. With no
    /// endpoints the address comes from `VAULT_ADDR`, then the built-in default.
    pub fn from_lookup<F>(machines: &[String], lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = match machines.first() {
            Some(machine) => machine.trim_end_matches('/').to_string(),
            None => non_empty(lookup(VAULT_ADDR_ENV))
                .unwrap_or_else(|| DEFAULT_VAULT_ADDRESS.to_string()),
        };

        if machines.len() > 1 {
            tracing::debug!(ignored = machines.len() - 1, "Only the first Vault endpoint is used");
        }

        let auth = VaultAuth::from_lookup(&lookup)?;
        let namespace = non_empty(lookup(VAULT_NAMESPACE_ENV));

        Ok(Self {
            address,
            namespace,
            auth,
            watch: WatchConfig::default(),
            renewal: RenewalConfig::default(),
        })
    }

    /// Validate nested watch and renewal settings
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::config("Vault address cannot be empty"));
        }
        self.watch.validate().map_err(|e| Error::config(e.to_string()))?;
        self.renewal.validate().map_err(|e| Error::config(e.to_string()))?;
        Ok(())
    }
}

/// Consul backend configuration
#[derive(Debug, Clone, Validate)]
pub struct ConsulSettings {
    /// Consul HTTP address including scheme
    #[validate(length(min = 1, message = "Consul address cannot be empty"))]
    pub address: String,

    /// ACL token sent with every request
    pub token: Option<SecretString>,

    /// Maximum server-side wait of a blocking watch query
    #[validate(range(min = 1, max = 600, message = "Wait must be between 1 and 600 seconds"))]
    pub wait_seconds: u64,

    /// Watch engine configuration
    #[validate(nested)]
    pub watch: WatchConfig,
}

impl ConsulSettings {
    /// Build settings from an endpoint list and the process environment.
    pub fn from_env(machines: &[String]) -> Result<Self> {
        Self::from_lookup(machines, env_lookup)
    }

    /// Build settings from an endpoint list and `lookup`.
    ///
    /// Fails with [`Error::NoEndpoint`] when the list is empty.
    pub fn from_lookup<F>(machines: &[String], lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let machine = machines.first().ok_or_else(|| Error::no_endpoint("consul"))?;

        Ok(Self {
            address: normalize_http_address(machine),
            token: non_empty(lookup(CONSUL_TOKEN_ENV)).map(SecretString::new),
            wait_seconds: 300,
            watch: WatchConfig::default(),
        })
    }

    /// Get the blocking query wait as Duration
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    /// Validate the settings
    pub fn validate_settings(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| Error::config(e.to_string()))
    }
}

/// Prefix scheme-less `host:port` addresses with `http://`.
fn normalize_http_address(machine: &str) -> String {
    let trimmed = machine.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_watch_config_default() {
        let config = WatchConfig::default();
        assert_eq!(config.backoff(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_watch_config_rejects_zero_backoff() {
        let config = WatchConfig { backoff_seconds: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_approle_takes_precedence_over_token() {
        let lookup = lookup_from(&[
            (VAULT_ROLE_ID_ENV, "role-1"),
            (VAULT_SECRET_ID_ENV, "secret-1"),
            (VAULT_TOKEN_ENV, "hvs.static"),
        ]);

        match VaultAuth::from_lookup(lookup).unwrap() {
            VaultAuth::AppRole { role_id, secret_id, mount } => {
                assert_eq!(role_id, "role-1");
                assert_eq!(secret_id.expose_secret(), "secret-1");
                assert_eq!(mount, "approle");
            }
            other => panic!("expected AppRole, got {:?}", other),
        }
    }

    #[test]
    fn test_static_token_when_no_role() {
        let lookup = lookup_from(&[(VAULT_TOKEN_ENV, "hvs.static")]);
        let auth = VaultAuth::from_lookup(lookup).unwrap();
        assert_eq!(auth, VaultAuth::Token(SecretString::new("hvs.static")));
        assert_eq!(auth.method(), "token");
    }

    #[test]
    fn test_empty_role_id_is_ignored() {
        let lookup = lookup_from(&[(VAULT_ROLE_ID_ENV, ""), (VAULT_TOKEN_ENV, "hvs.static")]);
        assert_eq!(VaultAuth::from_lookup(lookup).unwrap().method(), "token");
    }

    #[test]
    fn test_unknown_auth_method() {
        let err = VaultAuth::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::UnknownAuthMethod));
    }

    #[test]
    fn test_vault_first_machine_is_authoritative() {
        let machines = vec!["https://vault-a:8200/".to_string(), "https://vault-b:8200".to_string()];
        let settings =
            VaultSettings::from_lookup(&machines, lookup_from(&[(VAULT_TOKEN_ENV, "t")])).unwrap();
        assert_eq!(settings.address, "https://vault-a:8200");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_vault_falls_back_to_default_address() {
        let settings =
            VaultSettings::from_lookup(&[], lookup_from(&[(VAULT_TOKEN_ENV, "t")])).unwrap();
        assert_eq!(settings.address, DEFAULT_VAULT_ADDRESS);

        let settings = VaultSettings::from_lookup(
            &[],
            lookup_from(&[(VAULT_TOKEN_ENV, "t"), (VAULT_ADDR_ENV, "http://vault.local:8200")]),
        )
        .unwrap();
        assert_eq!(settings.address, "http://vault.local:8200");
    }

    #[test]
    fn test_vault_settings_require_auth() {
        let machines = vec!["http://vault:8200".to_string()];
        assert!(matches!(
            VaultSettings::from_lookup(&machines, lookup_from(&[])),
            Err(Error::UnknownAuthMethod)
        ));
    }

    #[test]
    fn test_consul_requires_endpoint() {
        let err = ConsulSettings::from_lookup(&[], lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::NoEndpoint { .. }));
    }

    #[test]
    fn test_consul_address_normalization() {
        let machines = vec!["127.0.0.1:8500".to_string(), "ignored:8500".to_string()];
        let settings = ConsulSettings::from_lookup(&machines, lookup_from(&[])).unwrap();
        assert_eq!(settings.address, "http://127.0.0.1:8500");
        assert!(settings.token.is_none());
        assert_eq!(settings.wait(), Duration::from_secs(300));
        assert!(settings.validate_settings().is_ok());

        let machines = vec!["https://consul.example.com/".to_string()];
        let settings = ConsulSettings::from_lookup(
            &machines,
            lookup_from(&[(CONSUL_TOKEN_ENV, "acl-token")]),
        )
        .unwrap();
        assert_eq!(settings.address, "https://consul.example.com");
        assert_eq!(settings.token.unwrap().expose_secret(), "acl-token");
    }

    #[test]
    fn test_renewal_config_defaults() {
        let config = RenewalConfig::default();
        assert_eq!(config.relogin_backoff(), Duration::from_secs(5));
        assert_eq!(config.grace(), Duration::from_secs(5));
        assert_eq!(config.increment(), None);
    }
}
