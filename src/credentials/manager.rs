//! AppRole login and the background renewal loop.

use super::lifetime::{LifetimeWatcher, WatcherEvent};
use super::{AuthTransport, SecretString, SessionCredential};
use crate::config::RenewalConfig;
use crate::errors::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

/// AppRole identity used for the initial login and every re-login.
#[derive(Debug, Clone, PartialEq)]
pub struct AppRoleLogin {
    pub role_id: String,
    pub secret_id: SecretString,
    pub mount: String,
}

impl AppRoleLogin {
    pub fn new(role_id: impl Into<String>, secret_id: impl Into<SecretString>) -> Self {
        Self {
            role_id: role_id.into(),
            secret_id: secret_id.into(),
            mount: crate::config::DEFAULT_APPROLE_MOUNT.to_string(),
        }
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }
}

/// Keeps an AppRole session alive for as long as its handle lives.
pub struct CredentialManager {
    transport: Arc<dyn AuthTransport>,
    login: AppRoleLogin,
    config: RenewalConfig,
    span: Span,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("login", &self.login)
            .field("config", &self.config)
            .finish()
    }
}

impl CredentialManager {
    pub fn new(transport: Arc<dyn AuthTransport>, login: AppRoleLogin, config: RenewalConfig) -> Self {
        Self { transport, login, config, span: Span::current() }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Log in with the AppRole identity and install the resulting token.
    pub async fn login(&self) -> Result<SessionCredential> {
        let credential = self
            .transport
            .login_approle(&self.login.mount, &self.login.role_id, &self.login.secret_id)
            .await
            .map_err(|e| {
                error!(error = %e, mount = %self.login.mount, "AppRole login failed");
                e
            })?;

        self.transport.install_token(&credential.token)?;

        info!(
            mount = %self.login.mount,
            lease_secs = credential.lease_duration.as_secs(),
            renewable = credential.renewable,
            "Logged in with AppRole"
        );
        Ok(credential)
    }

    fn watcher(&self, lease: &SessionCredential) -> LifetimeWatcher {
        LifetimeWatcher::new(self.transport.clone(), lease.lease_duration, lease.renewable)
            .with_increment(self.config.increment())
            .with_grace(self.config.grace())
    }

    /// Start the renewal loop for `initial`, the credential from [`login`](Self::login).
    pub fn spawn(self, initial: SessionCredential) -> RenewalHandle {
        let cancel = CancellationToken::new();
        let restarts = Arc::new(AtomicU64::new(0));

        let span = self.span.clone();
        let task = tokio::spawn(
            self.run(initial, cancel.clone(), restarts.clone()).instrument(span),
        );

        RenewalHandle { cancel, restarts, task: Some(task) }
    }

    async fn run(self, mut lease: SessionCredential, cancel: CancellationToken, restarts: Arc<AtomicU64>) {
        let mut watcher = self.watcher(&lease).start();
        let mut started = Instant::now();
        info!(lease_secs = lease.lease_duration.as_secs(), "Credential renewal started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    watcher.stop();
                    info!("Credential renewal stopped");
                    return;
                }
                event = watcher.next_event() => {
                    match event {
                        WatcherEvent::Renewed(output) => {
                            debug!(
                                lease_secs = output.lease_duration.as_secs(),
                                "Successfully renewed token"
                            );
                            lease.lease_duration = output.lease_duration;
                        }
                        WatcherEvent::Done(outcome) => {
                            match outcome {
                                Some(e) => error!(error = %e, "Error renewing token"),
                                None => info!("Token lease ran out, logging in again"),
                            }

                            let lived = started.elapsed();
                            let backoff = self.config.relogin_backoff();
                            if lived < backoff {
                                debug!(
                                    lived_ms = lived.as_millis() as u64,
                                    "Lease ended early, delaying re-login"
                                );
                                tokio::select! {
                                    biased;
                                    _ = cancel.cancelled() => {
                                        info!("Credential renewal stopped");
                                        return;
                                    }
                                    _ = tokio::time::sleep(backoff - lived) => {}
                                }
                            }

                            match self.relogin(&cancel).await {
                                Some(credential) => lease = credential,
                                None if cancel.is_cancelled() => return,
                                None => {}
                            }

                            let count = restarts.fetch_add(1, Ordering::Relaxed) + 1;
                            watcher = self.watcher(&lease).start();
                            started = Instant::now();
                            debug!(restarts = count, "Restarted renewal watcher");
                        }
                    }
                }
            }
        }
    }

    /// One re-login attempt. On failure waits the re-login backoff and yields
    /// `None` so the watcher restarts on the previous lease.
    async fn relogin(&self, cancel: &CancellationToken) -> Option<SessionCredential> {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            attempt = self.login() => attempt,
        };

        match attempt {
            Ok(credential) => Some(credential),
            Err(e) => {
                let backoff = self.config.relogin_backoff();
                error!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Re-login failed, keeping the previous session"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
                None
            }
        }
    }
}

/// Handle to a running renewal loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct RenewalHandle {
    cancel: CancellationToken,
    restarts: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl RenewalHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of times the renewal watcher has been restarted.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Credential renewal task failed");
            }
        }
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
