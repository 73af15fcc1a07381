//! Watch stream engine.
//!
//! Turns a backend's request/response read into a perpetual stream of
//! snapshots. Each poll cycle produces exactly one [`WatchResponse`]:
//!
//! ```text
//!            success: emit snapshot, poll again immediately
//!          ┌──────────┐
//!          ▼          │
//!      ┌─────────┐────┘        ┌────────────────┐
//!  ──▶ │ POLLING │ ── failure ▶│ ERROR-BACKOFF  │ ── backoff elapsed ──┐
//!      └─────────┘  emit error └────────────────┘                      │
//!          ▲                                                           │
//!          └───────────────────────────────────────────────────────────┘
//!      stop signal observed between cycles ──▶ STOPPED
//! ```
//!
//! The engine never times out an in-flight read; the stop signal takes effect
//! once the read returns, and its result is then discarded.

use crate::config::WatchConfig;
use crate::errors::{Error, Result};
use crate::store::{BackendStore, WatchCursor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn, Instrument, Span};

/// Receiving end of a watch.
///
/// Holds at most one undelivered response; the engine does not start a new
/// send until the previous one has been taken.
pub type WatchStream = mpsc::Receiver<WatchResponse>;

/// Result of one poll cycle.
#[derive(Debug)]
pub enum WatchResponse {
    /// Full document in wire form.
    Snapshot(Vec<u8>),
    /// The read or its serialization failed.
    Error(Error),
}

impl WatchResponse {
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Snapshot(bytes) => Some(bytes),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Snapshot(_) => None,
            Self::Error(err) => Some(err),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn into_result(self) -> Result<Vec<u8>> {
        match self {
            Self::Snapshot(bytes) => Ok(bytes),
            Self::Error(err) => Err(err),
        }
    }
}

/// Sending half of a stop signal. Dropping it also stops the watch.
#[derive(Debug)]
pub struct StopHandle(watch::Sender<bool>);

impl StopHandle {
    pub fn stop(&self) {
        // No receivers left means every watch has already exited.
        let _ = self.0.send(true);
    }
}

/// Cancellation signal observed by a watch between poll cycles.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Whether stop was requested or the handle is gone.
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once [`is_stopped`](Self::is_stopped) holds.
    pub async fn stopped(&mut self) {
        while !self.is_stopped() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Create a linked stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(tx), StopSignal(rx))
}

/// Poll loop over one key of one store.
pub struct WatchEngine<S: ?Sized> {
    store: Arc<S>,
    key: String,
    backoff: Duration,
    span: Span,
}

impl<S> WatchEngine<S>
where
    S: BackendStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, key: impl Into<String>, config: &WatchConfig) -> Self {
        let key = key.into();
        let span = crate::watch_span!(key);
        Self { store, key, backoff: config.backoff(), span }
    }

    /// Log under `span` instead of a fresh `watch` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Override the failure backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spawn the loop on the current runtime and return its output.
    pub fn spawn(self, stop: StopSignal) -> WatchStream {
        let (tx, rx) = mpsc::channel(1);
        let span = self.span.clone();
        tokio::spawn(self.run(tx, stop).instrument(span));
        rx
    }

    async fn run(self, tx: mpsc::Sender<WatchResponse>, mut stop: StopSignal) {
        let mut cursor = WatchCursor::default();
        let mut cycles: u64 = 0;

        debug!(backoff_secs = self.backoff.as_secs_f64(), "Watch started");

        loop {
            if stop.is_stopped() {
                break;
            }

            let outcome = self.store.poll(&self.key, &mut cursor).await;
            cycles += 1;

            if stop.is_stopped() {
                debug!(cycle = cycles, "Stop requested during read, discarding result");
                break;
            }

            let (response, backoff) = match outcome {
                Ok(document) => match document.to_bytes() {
                    Ok(bytes) => (WatchResponse::Snapshot(bytes), false),
                    Err(e) => {
                        warn!(error = %e, "Unable to serialize watched document");
                        (WatchResponse::Error(e), false)
                    }
                },
                Err(e) => {
                    if e.is_retryable() {
                        warn!(error = %e, cycle = cycles, "Watch read failed");
                    } else {
                        error!(error = %e, cycle = cycles, "Watch read failed with a non-retryable error");
                    }
                    cursor.reset();
                    (WatchResponse::Error(e), true)
                }
            };

            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                sent = tx.send(response) => {
                    if sent.is_err() {
                        debug!("Watch receiver dropped");
                        break;
                    }
                }
            }

            if backoff {
                tokio::select! {
                    biased;
                    _ = stop.stopped() => break,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        debug!(cycles, "Watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_response_accessors() {
        let ok = WatchResponse::Snapshot(b"{}".to_vec());
        assert_eq!(ok.value(), Some(&b"{}"[..]));
        assert!(ok.error().is_none());
        assert!(!ok.is_error());
        assert_eq!(ok.into_result().unwrap(), b"{}".to_vec());

        let err = WatchResponse::Error(Error::not_found("secret/app"));
        assert!(err.value().is_none());
        assert!(err.is_error());
        assert!(err.into_result().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stop_signal_via_send() {
        let (handle, mut signal) = stop_channel();
        assert!(!signal.is_stopped());

        handle.stop();
        assert!(signal.is_stopped());
        signal.stopped().await;
    }

    #[test]
    fn test_stopped_pending_until_stop() {
        let (handle, signal) = stop_channel();
        let mut waiter = signal.clone();
        let mut stopped = tokio_test::task::spawn(async move { waiter.stopped().await });

        tokio_test::assert_pending!(stopped.poll());
        handle.stop();
        assert!(stopped.is_woken());
        tokio_test::assert_ready!(stopped.poll());
    }

    #[tokio::test]
    async fn test_stop_signal_via_drop() {
        let (handle, mut signal) = stop_channel();
        let other = signal.clone();

        drop(handle);
        assert!(signal.is_stopped());
        assert!(other.is_stopped());
        signal.stopped().await;
    }
}
