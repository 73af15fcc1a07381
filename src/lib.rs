//! # remote-config
//!
//! A client layer that lets an application read, write and continuously
//! observe key/value configuration held in a remote store, through one
//! polymorphic interface.
//!
//! ## Architecture
//!
//! ```text
//! Application ──▶ BackendStore (Consul | Vault) ──▶ Watch Engine ──▶ WatchStream
//!                        │                                 │
//!                  Normalization                  Credential Manager
//!              (paths → flat document)       (AppRole login + renewal)
//! ```
//!
//! ## Core Components
//!
//! - **Backend stores**: uniform `get`/`list`/`set`/`watch` over Consul KV and Vault
//! - **Normalization**: flattens hierarchical listings into one JSON document
//! - **Watch engine**: turns request/response reads into a stream of snapshots
//! - **Credential manager**: keeps an AppRole session alive indefinitely
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use remote_config::{remote, stop_channel, store::BackendKind, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = remote::connect(BackendKind::Consul, &["127.0.0.1:8500".to_string()]).await?;
//!     println!("{}", String::from_utf8_lossy(&store.get("app/db").await?));
//!
//!     let (stop, signal) = stop_channel();
//!     let mut updates = store.clone().watch("app/db", signal);
//!     while let Some(update) = updates.recv().await {
//!         match update.into_result() {
//!             Ok(snapshot) => println!("{}", String::from_utf8_lossy(&snapshot)),
//!             Err(e) => eprintln!("watch error: {}", e),
//!         }
//!     }
//!     stop.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod errors;
pub mod normalize;
pub mod observability;
pub mod remote;
pub mod store;
pub mod watch;

// Re-export commonly used types and traits
pub use config::{ConsulSettings, LoggingConfig, VaultSettings, WatchConfig};
pub use errors::{Error, Result};
pub use normalize::Document;
pub use observability::init_logging;
pub use store::{BackendKind, BackendStore, ConsulStore, KvPair, VaultStore};
pub use watch::{stop_channel, StopHandle, StopSignal, WatchResponse, WatchStream};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
