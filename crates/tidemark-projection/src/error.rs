//! Error types for projection coordination.

use crate::status::ProjectionStatus;
use thiserror::Error;
use tidemark_storage::error::StorageError;

/// Result type alias for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Errors raised by the projection coordinator and store.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// A rebuild token was missing, expired, or does not match the
    /// rebuild in progress
    #[error("Invalid rebuild token: {0}")]
    InvalidToken(String),

    /// The requested status transition is not part of the lifecycle
    #[error("Invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current status
        from: ProjectionStatus,
        /// Requested status
        to: ProjectionStatus,
    },

    /// A projection body references a checkpoint blob that is absent
    #[error("Checkpoint {fingerprint} missing for projection {projection}")]
    CheckpointMissing {
        /// Projection name
        projection: String,
        /// Fingerprint the body references
        fingerprint: String,
    },

    /// A concurrent writer updated the status or body first
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Persisted state could not be interpreted
    #[error("Processing error: {0}")]
    Processing(String),

    /// Blob storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProjectionError {
    /// Create an invalid-token error.
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    /// Create a processing error.
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }
}
