//! Error types for the realtime dataset agent

use thiserror::Error;

/// Result type alias using the agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the realtime dataset agent
#[derive(Error, Debug)]
pub enum Error {
    // Backend errors
    #[error("Backend request failed: {operation} - {message}")]
    Backend { operation: String, message: String },

    #[error("Backend returned HTTP {status} for {operation}: {body}")]
    HttpStatus {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Device record has no realtime datasets: {device_id}")]
    NoRealtimeDatasets { device_id: String },

    // Pub/sub transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Invalid broker endpoint: {endpoint} - {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Subscribe failed for topic {topic}: {message}")]
    Subscribe { topic: String, message: String },

    // Inbound message errors
    #[error("Malformed renewal message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    // Device capability errors
    #[error("Device error for dataset {dataset_id}: {message}")]
    Device { dataset_id: String, message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    // Timeout errors
    #[error("Operation timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl Error {
    /// Returns true if this error is retryable on the next loop tick
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend { .. }
            | Error::Transport { .. }
            | Error::Subscribe { .. }
            | Error::Timeout { .. } => true,
            // 5xx and 429 only
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. } | Error::NoRealtimeDatasets { .. }
        )
    }

    /// Shorthand for a backend error tagged with the failing operation
    pub fn backend(operation: impl Into<String>, message: impl ToString) -> Self {
        Error::Backend {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a device capability error
    pub fn device(dataset_id: impl Into<String>, message: impl ToString) -> Self {
        Error::Device {
            dataset_id: dataset_id.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
