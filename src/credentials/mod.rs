//! Session credential lifecycle.
//!
//! A Vault store authenticated through AppRole holds a short-lived session
//! token. [`CredentialManager`] performs the initial login and then runs a
//! renewal loop next to any active watches:
//!
//! - a [`LifetimeWatcher`] renews the token ahead of lease expiry;
//! - when the watcher completes (lease exhausted, renewal failing, or no longer
//!   extendable) the manager logs in again and starts a fresh watcher;
//! - the loop only ends when its cancellation token fires.
//!
//! The manager is the only writer of the live token after login. Readers go
//! through the transport, which swaps the token atomically.

pub mod lifetime;
pub mod manager;
pub mod secret;

use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use lifetime::{LifetimeWatcher, RenewalOutput, WatcherEvent, WatcherHandle};
pub use manager::{AppRoleLogin, CredentialManager, RenewalHandle};
pub use secret::SecretString;

/// Authorization material returned by a login or renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: SecretString,
    pub lease_duration: Duration,
    pub renewable: bool,
}

impl SessionCredential {
    pub fn new(token: impl Into<SecretString>, lease_duration: Duration, renewable: bool) -> Self {
        Self { token: token.into(), lease_duration, renewable }
    }
}

/// Token operations the credential manager needs from a transport.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange an AppRole role and secret identifier for a session.
    async fn login_approle(
        &self,
        mount: &str,
        role_id: &str,
        secret_id: &SecretString,
    ) -> Result<SessionCredential>;

    /// Extend the lease of the token currently installed.
    async fn renew_self(&self, increment: Option<Duration>) -> Result<SessionCredential>;

    /// Replace the token used by every subsequent request.
    fn install_token(&self, token: &SecretString) -> Result<()>;
}
