//! Error types for blob storage operations.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by blob storage backends and the lock manager.
///
/// Callers need to tell the conditional-write outcomes apart: a missing
/// blob, a missing container, an ETag mismatch, and an already-exists
/// collision each drive different recovery paths.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested blob does not exist.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// The requested container does not exist.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// A conditional operation failed because the ETag no longer matches.
    #[error("Precondition failed for {0}: ETag mismatch")]
    PreconditionFailed(String),

    /// An `if-none-match: *` upload collided with an existing blob.
    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    /// A lease is currently held on the blob.
    #[error("Lease held on {0}")]
    LeaseHeld(String),

    /// The lease used for the operation is no longer valid.
    #[error("Lease lost on {0}")]
    LeaseLost(String),

    /// Container auto-creation was requested but failed.
    #[error("Container auto-create failed for {container}: {reason}")]
    ContainerAutoCreateFailed {
        /// Container that could not be created
        container: String,
        /// Backend failure description
        reason: String,
    },

    /// The operation did not complete within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether this error means "the blob or its container is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::BlobNotFound(_) | StorageError::ContainerNotFound(_)
        )
    }
}
