//! Error types for the pool and the deduplication layer.
//!
//! Callers only ever see two failure modes from `acquire()`: a connection
//! error (pool closed, creation exhausted, pool shutting down while waiting)
//! and a timeout. Validation failures are absorbed inside the pool.

use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the optional cause of a [`PoolError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        source: Option<BoxError>,
    },

    #[error("Timeout: acquiring a connection exceeded {}ms", .timeout.as_millis())]
    Timeout {
        /// The configured acquire timeout that elapsed.
        timeout: Duration,
        source: Option<BoxError>,
    },

    #[error("Invalid pool configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Pool not found: {name}")]
    PoolNotFound { name: String },

    #[error("Pool '{name}' is already registered")]
    PoolExists { name: String },
}

impl PoolError {
    /// Create a connection error without a cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping the underlying cause.
    pub fn connection_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error every pending waiter receives when the pool closes.
    pub fn closing() -> Self {
        Self::connection("Pool is closing")
    }

    /// Create a timeout error for the given acquire timeout.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout,
            source: None,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a pool not found error.
    pub fn pool_not_found(name: impl Into<String>) -> Self {
        Self::PoolNotFound { name: name.into() }
    }

    /// Create a pool already registered error.
    pub fn pool_exists(name: impl Into<String>) -> Self {
        Self::PoolExists { name: name.into() }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
