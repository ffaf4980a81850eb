//! Error types for the quota service.

use thiserror::Error;

/// Main error type for quota operations.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An identity key that cannot be tracked (empty or blank)
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Malformed replay input
    #[error("Invalid input: {0}")]
    Input(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quota operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
