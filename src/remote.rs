//! Connectors: build a ready backend store from an endpoint list.
//!
//! Settings come from the endpoint list plus the process environment, the same
//! way for every backend. The returned store is shared; watches take an
//! `Arc` so one store can serve any number of them.

use crate::errors::{Error, Result};
use crate::store::{BackendKind, BackendStore, ConsulStore};
use std::sync::Arc;

/// Build the store for `kind` from `machines`.
pub async fn connect(kind: BackendKind, machines: &[String]) -> Result<Arc<dyn BackendStore>> {
    match kind {
        BackendKind::Consul => connect_consul(machines),
        BackendKind::Vault => connect_vault(machines).await,
    }
}

/// Consul store on the first endpoint. Fails when `machines` is empty.
pub fn connect_consul(machines: &[String]) -> Result<Arc<dyn BackendStore>> {
    Ok(Arc::new(ConsulStore::from_machines(machines)?))
}

/// Vault store on the first endpoint, authenticated from the environment.
#[cfg(feature = "vault")]
pub async fn connect_vault(machines: &[String]) -> Result<Arc<dyn BackendStore>> {
    let store = crate::store::VaultStore::from_machines(machines).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "vault"))]
pub async fn connect_vault(_machines: &[String]) -> Result<Arc<dyn BackendStore>> {
    Err(Error::config("Vault support is not enabled in this build"))
}

/// Parse a backend name and connect.
pub async fn connect_named(backend: &str, machines: &[String]) -> Result<Arc<dyn BackendStore>> {
    let kind = backend.parse::<BackendKind>().map_err(Error::config)?;
    connect(kind, machines).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_consul() {
        let store = connect(BackendKind::Consul, &["127.0.0.1:8500".to_string()]).await.unwrap();
        assert_eq!(store.kind(), BackendKind::Consul);
    }

    #[tokio::test]
    async fn test_connect_consul_without_machines() {
        let err = connect(BackendKind::Consul, &[]).await.unwrap_err();
        assert!(matches!(err, Error::NoEndpoint { .. }));
    }

    #[tokio::test]
    async fn test_connect_named_rejects_unknown_backend() {
        let err = connect_named("etcd", &["127.0.0.1:2379".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
