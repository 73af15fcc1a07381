//! # Error Handling
//!
//! Error types shared by every backend store, the watch engine and the
//! credential manager.

use thiserror::Error;

/// Result type for remote configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, writing or watching remote configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// No endpoint address was supplied for a backend that requires one.
    #[error("No endpoint configured for {backend} backend")]
    NoEndpoint { backend: String },

    /// Neither AppRole credentials nor a static token were found.
    #[error("Unknown auth method: set VAULT_ROLE_ID or VAULT_TOKEN")]
    UnknownAuthMethod,

    /// Authentication with the backend failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Failed to reach the backend or build its transport.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The backend holds no data at the requested path.
    #[error("Key {key} was not found")]
    NotFound { key: String },

    /// Backend-specific error.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// The operation is intentionally unsupported by this backend.
    #[error("{operation} is not implemented for the {backend} backend")]
    NotImplemented { operation: &'static str, backend: &'static str },

    /// A value could not be written in the backend's format.
    #[error("Invalid value: {reason}")]
    InvalidValue { reason: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a no endpoint error.
    pub fn no_endpoint(backend: impl Into<String>) -> Self {
        Self::NoEndpoint { backend: backend.into() }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    /// Create a not implemented error.
    pub fn not_implemented(operation: &'static str, backend: &'static str) -> Self {
        Self::NotImplemented { operation, backend }
    }

    /// Create an invalid value error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue { reason: reason.into() }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the backend reported that no data exists at the path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying the same request later can succeed.
    ///
    /// Construction-time failures are permanent; everything observed while
    /// reading, renewing or serializing is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NoEndpoint { .. }
                | Self::UnknownAuthMethod
                | Self::Config { .. }
                | Self::NotImplemented { .. }
        )
    }
}
