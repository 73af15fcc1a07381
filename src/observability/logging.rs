//! # Structured Logging
//!
//! The library never logs through an implicit global context of its own. Each
//! store, watch engine and credential manager is handed a [`tracing::Span`] when
//! it is built and instruments its background tasks with it, so an application
//! decides where those events end up by choosing the parent span and the
//! subscriber.

use crate::config::LoggingConfig;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Create a span for one backend store.
///
/// ```rust,ignore
/// let span = store_span!("vault", "https://vault.example.com:8200");
/// ```
#[macro_export]
macro_rules! store_span {
    ($backend:expr, $address:expr) => {
        tracing::info_span!("backend_store", backend = %$backend, address = %$address)
    };
    ($backend:expr, $address:expr, $($field:tt)*) => {
        tracing::info_span!(
            "backend_store",
            backend = %$backend,
            address = %$address,
            $($field)*
        )
    };
}

/// Create a span for one watch stream, nested under the current span.
#[macro_export]
macro_rules! watch_span {
    ($key:expr) => {
        tracing::debug_span!("watch", key = %$key)
    };
    ($key:expr, $($field:tt)*) => {
        tracing::debug_span!("watch", key = %$key, $($field)*)
    };
}

/// Install a process-wide fmt subscriber.
///
/// `RUST_LOG` overrides `config.level`. If a subscriber is already installed
/// (for example by the host application or a test harness) this is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).finish(),
        )
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed; keeping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = store_span!("consul", "http://127.0.0.1:8500");
        let _span = store_span!("vault", "https://127.0.0.1:8200", auth = "approle");
        let _span = watch_span!("app/db");
        let _span = watch_span!("app/db", backend = "consul");
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(&LoggingConfig::default());
        init_logging(&LoggingConfig { level: "debug".to_string(), json: true });
    }
}
