//! # Observability Infrastructure
//!
//! Structured logging for stores, watch streams and credential renewal.

pub mod logging;

pub use logging::init_logging;
