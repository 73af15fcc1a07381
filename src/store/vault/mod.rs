//! Vault backend.
//!
//! A key is the exact path of one secret; the secret's data object is the
//! document. Unlike Consul, Vault distinguishes absence: a missing secret is
//! [`Error::NotFound`], and a watch on it reports that error every backoff
//! interval until the secret appears.
//!
//! Stores authenticated through AppRole own a [`RenewalHandle`]. The session
//! is renewed (and re-established when renewal stops working) in the
//! background for as long as the store lives, independently of any watch.

#[cfg(feature = "vault")]
pub mod transport;

#[cfg(feature = "vault")]
pub use transport::VaultRsTransport;

use super::{BackendKind, BackendStore, KvPair};
use crate::config::{VaultAuth, VaultSettings, WatchConfig};
use crate::credentials::{AppRoleLogin, AuthTransport, CredentialManager, RenewalHandle};
use crate::errors::{Error, Result};
use crate::normalize::Document;
use crate::watch::{StopSignal, WatchEngine, WatchStream};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, Instrument, Span};

/// Field a written value is stored under.
pub const VALUE_FIELD: &str = "value";

/// Logical read/write access to a Vault server.
#[async_trait]
pub trait VaultTransport: AuthTransport {
    /// Read the data object at `path`; `None` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Map<String, Value>>>;

    /// Write `data` at `path`, replacing what is stored there.
    async fn write(&self, path: &str, data: &HashMap<String, String>) -> Result<()>;
}

/// Vault backend store.
pub struct VaultStore {
    transport: Arc<dyn VaultTransport>,
    renewal: Option<RenewalHandle>,
    watch: WatchConfig,
    address: String,
    span: Span,
}

impl std::fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStore")
            .field("address", &self.address)
            .field("renewing", &self.renewal.is_some())
            .finish()
    }
}

impl VaultStore {
    /// Connect to the server in `settings` over HTTP and authenticate.
    #[cfg(feature = "vault")]
    pub async fn connect(settings: VaultSettings) -> Result<Self> {
        let transport = Arc::new(VaultRsTransport::new(&settings.address, settings.namespace.clone())?);
        Self::with_transport(transport, settings).await
    }

    /// Connect using the first endpoint of `machines` and the process environment.
    #[cfg(feature = "vault")]
    pub async fn from_machines(machines: &[String]) -> Result<Self> {
        Self::connect(VaultSettings::from_env(machines)?).await
    }

    /// Authenticate through `transport` and build the store on top of it.
    ///
    /// AppRole logs in and starts background renewal before returning; a
    /// static token is installed as is.
    pub async fn with_transport<T>(transport: Arc<T>, settings: VaultSettings) -> Result<Self>
    where
        T: VaultTransport + 'static,
    {
        settings.validate()?;

        let span = crate::store_span!("vault", settings.address, auth = settings.auth.method());

        let renewal = match &settings.auth {
            VaultAuth::AppRole { role_id, secret_id, mount } => {
                let login = AppRoleLogin::new(role_id.clone(), secret_id.clone()).with_mount(mount.clone());
                let manager = CredentialManager::new(
                    transport.clone() as Arc<dyn AuthTransport>,
                    login,
                    settings.renewal.clone(),
                )
                .with_span(span.clone());

                let initial = manager.login().instrument(span.clone()).await?;
                Some(manager.spawn(initial))
            }
            VaultAuth::Token(token) => {
                transport.install_token(token)?;
                None
            }
        };

        span.in_scope(|| info!("Initialized Vault backend"));

        Ok(Self {
            transport,
            renewal,
            watch: settings.watch,
            address: settings.address,
            span,
        })
    }

    /// Log under `span` instead of the default `backend_store` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Background renewal, present for AppRole sessions.
    pub fn renewal(&self) -> Option<&RenewalHandle> {
        self.renewal.as_ref()
    }

    /// Stop background renewal and wait for it to exit.
    pub async fn shutdown(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.join().await;
            self.span.in_scope(|| debug!("Vault credential renewal shut down"));
        }
    }
}

/// Wrap a written value as `{"value": "<text>"}`.
fn wrap_value(value: &[u8]) -> Result<HashMap<String, String>> {
    let text = std::str::from_utf8(value)
        .map_err(|e| Error::invalid_value(format!("Vault values must be UTF-8 text: {}", e)))?;

    let mut data = HashMap::new();
    data.insert(VALUE_FIELD.to_string(), text.to_string());
    Ok(data)
}

#[async_trait]
impl BackendStore for VaultStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Vault
    }

    async fn fetch(&self, key: &str) -> Result<Document> {
        let data = self.transport.read(key).instrument(self.span.clone()).await.map_err(|e| {
            self.span.in_scope(|| error!(error = %e, key = %key, "Failed to read secret from Vault"));
            e
        })?;

        match data {
            Some(data) => Ok(Document::from(data)),
            None => Err(Error::not_found(key)),
        }
    }

    async fn list(&self, _key: &str) -> Result<Vec<KvPair>> {
        Err(Error::not_implemented("list", "vault"))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let data = wrap_value(value)?;

        self.transport.write(key, &data).instrument(self.span.clone()).await.map_err(|e| {
            self.span.in_scope(|| error!(error = %e, key = %key, "Failed to write secret to Vault"));
            e
        })?;

        self.span.in_scope(|| debug!(key = %key, "Stored secret in Vault"));
        Ok(())
    }

    fn watch(self: Arc<Self>, key: &str, stop: StopSignal) -> WatchStream {
        let config = self.watch.clone();
        let span = self.span.in_scope(|| crate::watch_span!(key));
        WatchEngine::new(self, key, &config).with_span(span).spawn(stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_value() {
        let data = wrap_value(b"s3cret").unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("value").map(String::as_str), Some("s3cret"));
    }

    #[test]
    fn test_wrap_value_rejects_binary() {
        let err = wrap_value(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }
}
