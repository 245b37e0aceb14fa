//! Error types shared across the ingest workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, AqError>;

/// Shared error type
#[derive(Error, Debug)]
pub enum AqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },
}
