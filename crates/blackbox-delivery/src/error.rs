//! Error types for webhook dispatch, draining and scheduling.
//!
//! Per-record failures are turned into record state transitions by the
//! drainer; only structural failures (the store being unreachable, the
//! scheduler failing to stop) travel further up.

use std::{fmt, time::Duration};

use blackbox_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised while delivering queued webhooks.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Receiver answered with a 4xx status.
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Receiver answered with a 5xx (or otherwise non-2xx) status.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Stored payload could not be decoded.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Decoder error message
        message: String,
    },

    /// Queue store operation failed.
    #[error("database error: {message}")]
    DatabaseError {
        /// Database error message
        message: String,
    },

    /// Invalid delivery configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Scheduler was started twice.
    #[error("drain scheduler is already running")]
    AlreadyRunning,

    /// In-flight drain cycle did not finish within the shutdown grace period.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Grace period that elapsed
        timeout: Duration,
    },

    /// A background task panicked.
    #[error("background task panicked: {error}")]
    WorkerPanic {
        /// Join error rendered as text
        error: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates the error matching a non-2xx HTTP response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        if (400..500).contains(&status_code) {
            Self::ClientError { status_code, body: body.into() }
        } else {
            Self::ServerError { status_code, body: body.into() }
        }
    }

    /// Creates an invalid payload error.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload { message: message.into() }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Returns true for failures another attempt might cure.
    ///
    /// Every HTTP-level failure is retryable: the queue keeps trying until
    /// the attempt cap dead-letters the record.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ClientError { .. }
            | Self::ServerError { .. }
            | Self::DatabaseError { .. } => true,

            Self::InvalidPayload { .. }
            | Self::ConfigurationError { .. }
            | Self::AlreadyRunning
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. }
            | Self::InternalError { .. } => false,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(error: CoreError) -> Self {
        Self::database(error.to_string())
    }
}

/// Coarse error classification used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Malformed stored payloads.
    Payload,
    /// Store operations.
    Database,
    /// Configuration problems.
    Configuration,
    /// Lifecycle and internal failures.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::InvalidPayload { .. } => Self::Payload,
            DeliveryError::DatabaseError { .. } => Self::Database,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::AlreadyRunning
            | DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::WorkerPanic { .. }
            | DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Payload => write!(f, "payload"),
            Self::Database => write!(f, "database"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
