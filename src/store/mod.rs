//! Backend stores: one uniform client over each remote configuration system.
//!
//! Every backend implements [`BackendStore`]. Reads return the serialized
//! [`Document`](crate::normalize::Document) wire form; `watch` turns the
//! request/response API into a continuous stream of snapshots driven by the
//! [`WatchEngine`](crate::watch::WatchEngine).
//!
//! ## Supported Backends
//!
//! - **Consul**: hierarchical KV store, a prefix listing becomes one document
//! - **Vault**: secrets service, one secret object becomes one document

pub mod consul;
pub mod vault;

use crate::errors::Result;
use crate::normalize::Document;
use crate::watch::{StopSignal, WatchStream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use consul::ConsulStore;
pub use vault::{VaultStore, VaultTransport};

/// Type of backend store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Consul KV
    Consul,
    /// HashiCorp Vault
    Vault,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consul => "consul",
            Self::Vault => "vault",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "consul" => Ok(Self::Consul),
            "vault" => Ok(Self::Vault),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a hierarchical listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Per-watch state carried from one poll cycle to the next.
///
/// Backends with change-notification primitives (Consul blocking queries)
/// keep their last seen index here; plain polling backends ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchCursor {
    index: Option<u64>,
}

impl WatchCursor {
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    /// Record the index returned by the backend.
    ///
    /// An index of zero or one lower than the last seen value means the
    /// backend state was reset; the cursor starts over.
    pub fn advance(&mut self, next: u64) {
        self.index = match self.index {
            _ if next == 0 => None,
            Some(previous) if next < previous => None,
            _ => Some(next),
        };
    }

    pub fn reset(&mut self) {
        self.index = None;
    }
}

/// Uniform client over one remote configuration system.
///
/// Operations a backend does not support report
/// [`Error::NotImplemented`](crate::Error::NotImplemented) at runtime;
/// callers must tolerate that for `list` on every backend.
#[async_trait]
pub trait BackendStore: Send + Sync + fmt::Debug {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// One-shot read, normalized.
    ///
    /// For Consul `key` is a prefix and an empty listing is an empty document.
    /// For Vault `key` is the exact secret path and absence is
    /// [`Error::NotFound`](crate::Error::NotFound).
    async fn fetch(&self, key: &str) -> Result<Document>;

    /// One-shot read in wire form: a single JSON object.
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.fetch(key).await?.to_bytes()
    }

    /// Enumerate child keys under `key`.
    async fn list(&self, key: &str) -> Result<Vec<KvPair>>;

    /// Write `value` at `key`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read performed by one watch cycle.
    async fn poll(&self, key: &str, cursor: &mut WatchCursor) -> Result<Document> {
        let _ = cursor;
        self.fetch(key).await
    }

    /// Start watching `key` until `stop` fires.
    fn watch(self: Arc<Self>, key: &str, stop: StopSignal) -> WatchStream;
}
