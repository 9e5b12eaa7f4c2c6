//! Error types for hald

use thiserror::Error;

/// Main error type for hald core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Duplicate UDI: {0}")]
    DuplicateUdi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a duplicate UDI error
    pub fn duplicate_udi(udi: impl Into<String>) -> Self {
        Error::DuplicateUdi(udi.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
