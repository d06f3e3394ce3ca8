//! Error types for themis

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, ThemisError>;

/// Errors that reach the caller. Backend failures never show up here, they are
/// folded into `BackendResult::status` instead.
#[derive(Error, Debug)]
pub enum ThemisError {
    /// Malformed input, cache key, hash or TTL
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend name with no registered factory
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cached payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThemisError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ThemisError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ThemisError::Validation(_))
    }
}
