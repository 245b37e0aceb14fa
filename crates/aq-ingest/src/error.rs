//! Ingest error types

use thiserror::Error;

use crate::category::Category;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised inside the ingest core.
///
/// None of these escape the two entry points ([`crate::ingress`] and
/// [`crate::scheduler`]); they are logged at the component boundary.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Object not found: s3://{bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Failed to decode {key}: {message}")]
    Decode { key: String, message: String },

    #[error("Rejected {key}: {message}")]
    Sink { key: String, message: String },

    #[error("{category} loader made no progress ({processed} of {target} processed)")]
    Stalled {
        category: Category,
        processed: u64,
        target: u64,
    },

    #[error("No loader registered for {0}")]
    MissingLoader(Category),

    #[error(transparent)]
    Common(#[from] aq_common::AqError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    /// Whether retrying the same key can never succeed.
    ///
    /// Permanent failures complete the fetch log row with an error message;
    /// everything else leaves the row pending for the next drain.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            IngestError::ObjectNotFound { .. } | IngestError::Decode { .. } | IngestError::Sink { .. }
        )
    }
}
