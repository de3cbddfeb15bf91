//! Error types for the hearth-automation core
//!
//! One crate-wide error enum with helper constructors. Soft failures
//! (unknown targets, malformed tracker states) are logged and absorbed at
//! the call site rather than surfaced through this type; everything that
//! aborts a dispatch or a configuration load lands here.

use thiserror::Error;

/// Result type alias for hearth-automation operations
pub type Result<T> = std::result::Result<T, HearthError>;

/// Error types for presence and notification operations
#[derive(Error, Debug)]
pub enum HearthError {
    /// Configuration errors (bad TOML, failed validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input to a dispatch call (empty message, empty target list)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Service call failures reported by the framework transport
    #[error("Service call failed: {0}")]
    ServiceCall(String),

    /// JSON payload errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors (config file reads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl HearthError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a service call error
    pub fn service_call<S: Into<String>>(msg: S) -> Self {
        Self::ServiceCall(msg.into())
    }

    /// Whether this error indicates bad caller input
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Config(_))
    }
}
