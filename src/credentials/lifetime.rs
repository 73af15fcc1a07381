//! Renewal watcher for one session lease.
//!
//! A [`LifetimeWatcher`] keeps a single lease alive: it renews the token when
//! two thirds of the remaining lease have elapsed and reports each success.
//! Renewal errors are tolerated until the lease is within `grace` of running
//! out; the watcher then completes with the last error. A lease that is not
//! renewable, or that renewal no longer extends past `grace`, completes
//! without error once it runs out. A zero lease never expires: the watcher
//! then waits until it is stopped.

use super::AuthTransport;
use crate::errors::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn, Instrument};

/// Shortest pause between renewal attempts.
const MIN_RENEW_DELAY: Duration = Duration::from_millis(500);

/// One successful renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalOutput {
    pub renewed_at: Instant,
    pub lease_duration: Duration,
}

/// What a running watcher reported.
#[derive(Debug)]
pub enum WatcherEvent {
    /// The lease was extended.
    Renewed(RenewalOutput),
    /// The watcher finished; `Some` carries the renewal error that ended it.
    Done(Option<Error>),
}

/// Renews one lease until it can no longer be kept alive.
#[derive(Clone)]
pub struct LifetimeWatcher {
    transport: Arc<dyn AuthTransport>,
    lease_duration: Duration,
    renewable: bool,
    increment: Option<Duration>,
    grace: Duration,
}

impl std::fmt::Debug for LifetimeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeWatcher")
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .field("increment", &self.increment)
            .field("grace", &self.grace)
            .finish()
    }
}

impl LifetimeWatcher {
    pub fn new(transport: Arc<dyn AuthTransport>, lease_duration: Duration, renewable: bool) -> Self {
        Self { transport, lease_duration, renewable, increment: None, grace: Duration::ZERO }
    }

    /// Requested extension per renewal; defaults to the initial lease duration.
    pub fn with_increment(mut self, increment: Option<Duration>) -> Self {
        self.increment = increment;
        self
    }

    /// Remaining lease at which the watcher gives up.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Spawn the renewal task in the current span.
    pub fn start(&self) -> WatcherHandle {
        let (done_tx, done_rx) = oneshot::channel();
        let (renewed_tx, renewed_rx) = mpsc::channel(8);

        let watcher = self.clone();
        let task = tokio::spawn(
            async move {
                let outcome = watcher.renew_until_exhausted(&renewed_tx).await;
                let _ = done_tx.send(outcome);
            }
            .in_current_span(),
        );

        WatcherHandle { done: done_rx, renewed: renewed_rx, finished: false, task }
    }

    fn increment(&self) -> Option<Duration> {
        self.increment.or(Some(self.lease_duration))
    }

    async fn renew_until_exhausted(&self, renewed: &mpsc::Sender<RenewalOutput>) -> Option<Error> {
        if self.lease_duration.is_zero() {
            debug!("Lease has no expiry, nothing to renew");
            return std::future::pending().await;
        }

        if !self.renewable {
            debug!(
                lease_secs = self.lease_duration.as_secs(),
                "Lease is not renewable, waiting for it to run out"
            );
            sleep(self.lease_duration.saturating_sub(self.grace)).await;
            return None;
        }

        let mut remaining = self.lease_duration;
        loop {
            let started = Instant::now();
            sleep(renew_delay(remaining)).await;

            match self.transport.renew_self(self.increment()).await {
                Ok(credential) => {
                    let output = RenewalOutput {
                        renewed_at: Instant::now(),
                        lease_duration: credential.lease_duration,
                    };
                    // The manager drains this channel; a full buffer only drops a log line.
                    let _ = renewed.try_send(output);

                    if credential.lease_duration.is_zero() {
                        debug!("Renewed lease has no expiry, nothing more to renew");
                        return std::future::pending().await;
                    }
                    if !credential.renewable || credential.lease_duration <= self.grace {
                        debug!(
                            lease_secs = credential.lease_duration.as_secs(),
                            "Lease can no longer be extended"
                        );
                        sleep(credential.lease_duration.saturating_sub(self.grace)).await;
                        return None;
                    }
                    remaining = credential.lease_duration;
                }
                Err(e) => {
                    remaining = remaining.saturating_sub(started.elapsed());
                    warn!(
                        error = %e,
                        remaining_secs = remaining.as_secs(),
                        "Token renewal failed, retrying until the lease runs out"
                    );
                    if remaining <= self.grace {
                        return Some(e);
                    }
                }
            }
        }
    }
}

/// Two thirds of the remaining lease, never less than [`MIN_RENEW_DELAY`].
fn renew_delay(remaining: Duration) -> Duration {
    (remaining * 2 / 3).max(MIN_RENEW_DELAY)
}

/// Handle to a running [`LifetimeWatcher`]. Dropping it stops the watcher.
pub struct WatcherHandle {
    done: oneshot::Receiver<Option<Error>>,
    renewed: mpsc::Receiver<RenewalOutput>,
    finished: bool,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Wait for the next renewal or for completion.
    ///
    /// Pending renewals are reported before completion. Once `Done` has been
    /// returned every further call returns `Done(None)` immediately.
    pub async fn next_event(&mut self) -> WatcherEvent {
        if self.finished {
            return WatcherEvent::Done(None);
        }

        tokio::select! {
            biased;
            Some(output) = self.renewed.recv() => WatcherEvent::Renewed(output),
            outcome = &mut self.done => {
                self.finished = true;
                match outcome {
                    Ok(outcome) => WatcherEvent::Done(outcome),
                    Err(_) => WatcherEvent::Done(Some(Error::internal(
                        "renewal watcher exited without reporting",
                    ))),
                }
            }
        }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
