//! Error types for the TAKRelay server.
//!
//! Library crates keep their own typed errors (frame and decode errors live in
//! `takrelay-cot`); this module holds the errors raised while loading and
//! validating configuration. Runtime IO failures are reported by the binary
//! with context attached where they happen.

use thiserror::Error;

/// Result type alias using RelayError as the error type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error type returned by [`crate::RelayConfig`] loading and validation.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors related to configuration loading and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
