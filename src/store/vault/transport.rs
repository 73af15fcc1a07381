//! HTTP transport to a Vault server built on `vaultrs`.

use super::VaultTransport;
use crate::credentials::{AuthTransport, SecretString, SessionCredential};
use crate::errors::{Error, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;

/// `vaultrs` client whose token can be swapped while requests are in flight.
pub struct VaultRsTransport {
    address: String,
    namespace: Option<String>,
    client: ArcSwap<VaultClient>,
}

impl std::fmt::Debug for VaultRsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultRsTransport")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

impl VaultRsTransport {
    /// Create an unauthenticated client for `address`.
    pub fn new(address: &str, namespace: Option<String>) -> Result<Self> {
        if address.is_empty() {
            return Err(Error::config("Vault address cannot be empty"));
        }

        let client = build_client(address, namespace.clone(), None)?;
        Ok(Self {
            address: address.to_string(),
            namespace,
            client: ArcSwap::new(Arc::new(client)),
        })
    }

    fn client(&self) -> Arc<VaultClient> {
        self.client.load_full()
    }
}

fn build_client(
    address: &str,
    namespace: Option<String>,
    token: Option<&SecretString>,
) -> Result<VaultClient> {
    let mut settings_builder = VaultClientSettingsBuilder::default();
    settings_builder.address(address);

    if let Some(token) = token {
        settings_builder.token(token.expose_secret());
    }

    if let Some(namespace) = namespace {
        settings_builder.namespace(Some(namespace));
    }

    let settings = settings_builder
        .build()
        .map_err(|e| Error::config(format!("Invalid Vault configuration: {}", e)))?;

    VaultClient::new(settings)
        .map_err(|e| Error::connection_failed(format!("Failed to create Vault client: {}", e)))
}

/// Split a logical path into its mount and the path below it.
fn split_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    match trimmed.split_once('/') {
        Some((mount, rest)) if !mount.is_empty() && !rest.is_empty() => Ok((mount, rest)),
        _ => Err(Error::invalid_value(format!(
            "Vault path '{}' must have the form <mount>/<path>",
            path
        ))),
    }
}

/// Whether a client error means the path holds nothing.
fn is_absent(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::APIError { code: 404, .. }
            | ClientError::ResponseEmptyError
            | ClientError::ResponseDataEmptyError
    )
}

fn map_client_error(err: ClientError, action: &str, path: &str) -> Error {
    match err {
        ClientError::APIError { code: 401 | 403, errors } => Error::authentication_failed(format!(
            "Vault denied {} of {}: {}",
            action,
            path,
            errors.join(", ")
        )),
        ClientError::RestClientError { .. } => {
            Error::connection_failed(format!("Vault {} of {} failed: {}", action, path, err))
        }
        other => Error::backend(format!("Vault {} of {} failed: {}", action, path, other)),
    }
}

fn credential(auth: vaultrs::api::AuthInfo) -> SessionCredential {
    SessionCredential::new(auth.client_token, Duration::from_secs(auth.lease_duration), auth.renewable)
}

#[async_trait]
impl AuthTransport for VaultRsTransport {
    async fn login_approle(
        &self,
        mount: &str,
        role_id: &str,
        secret_id: &SecretString,
    ) -> Result<SessionCredential> {
        let client = self.client();
        let auth = vaultrs::auth::approle::login(
            client.as_ref(),
            mount,
            role_id,
            secret_id.expose_secret(),
        )
        .await
        .map_err(|e| match e {
            ClientError::APIError { code: 400 | 401 | 403, errors } => {
                Error::authentication_failed(format!("AppRole login rejected: {}", errors.join(", ")))
            }
            other => map_client_error(other, "login", mount),
        })?;

        Ok(credential(auth))
    }

    async fn renew_self(&self, increment: Option<Duration>) -> Result<SessionCredential> {
        let increment = increment.map(|d| format!("{}s", d.as_secs()));
        let client = self.client();
        let auth = vaultrs::token::renew_self(client.as_ref(), increment.as_deref())
            .await
            .map_err(|e| map_client_error(e, "renewal", "auth/token/renew-self"))?;

        Ok(credential(auth))
    }

    fn install_token(&self, token: &SecretString) -> Result<()> {
        let client = build_client(&self.address, self.namespace.clone(), Some(token))?;
        self.client.store(Arc::new(client));
        Ok(())
    }
}

#[async_trait]
impl VaultTransport for VaultRsTransport {
    async fn read(&self, path: &str) -> Result<Option<Map<String, Value>>> {
        let (mount, rest) = split_path(path)?;
        let client = self.client();

        match vaultrs::kv1::get::<Value>(client.as_ref(), mount, rest).await {
            Ok(Value::Object(data)) => Ok(Some(data)),
            Ok(Value::Null) => Ok(None),
            Ok(other) => Err(Error::backend(format!(
                "Vault returned non-object data for {}: {}",
                path, other
            ))),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(map_client_error(e, "read", path)),
        }
    }

    async fn write(&self, path: &str, data: &HashMap<String, String>) -> Result<()> {
        let (mount, rest) = split_path(path)?;
        let body: HashMap<&str, &str> = data.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let client = self.client();

        vaultrs::kv1::set(client.as_ref(), mount, rest, &body)
            .await
            .map_err(|e| map_client_error(e, "write", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("secret/app/db").unwrap(), ("secret", "app/db"));
        assert_eq!(split_path("/secret/app/").unwrap(), ("secret", "app"));
        assert!(split_path("secret").is_err());
        assert!(split_path("").is_err());
    }

    #[test]
    fn test_is_absent() {
        assert!(is_absent(&ClientError::APIError { code: 404, errors: vec![] }));
        assert!(is_absent(&ClientError::ResponseDataEmptyError));
        assert!(!is_absent(&ClientError::APIError { code: 500, errors: vec![] }));
    }

    #[test]
    fn test_map_client_error() {
        let err = map_client_error(
            ClientError::APIError { code: 403, errors: vec!["permission denied".to_string()] },
            "read",
            "secret/app",
        );
        assert!(matches!(err, Error::AuthenticationFailed { .. }));
        assert!(err.to_string().contains("permission denied"));

        let err = map_client_error(
            ClientError::APIError { code: 503, errors: vec!["sealed".to_string()] },
            "read",
            "secret/app",
        );
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[test]
    fn test_debug_hides_client() {
        let transport = VaultRsTransport::new("https://vault.example.com:8200", None).unwrap();
        let debug = format!("{:?}", transport);
        assert!(debug.contains("vault.example.com"));
        assert!(debug.contains("[VaultClient]"));
    }
}
