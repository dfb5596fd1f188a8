//! Profile memory error types

use thiserror::Error;

/// Profile memory error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// User id cannot be used as a storage key
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// Dimension or field outside the profile schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Primary memory backend error (network, auth, rate limit, bad payload)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Local cache tier error
    #[error("Cache error: {0}")]
    Cache(String),

    /// No tier could durably record the write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for profile memory operations
pub type Result<T> = std::result::Result<T, Error>;
