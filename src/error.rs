//! Error types for the Tollgate service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration sources that could not be read or deserialized
    #[error("Configuration source error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
