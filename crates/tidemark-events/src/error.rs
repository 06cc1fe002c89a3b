//! Error types for the Tidemark event sourcing core.

use thiserror::Error;
use tidemark_storage::error::StorageError;

/// Result type alias for event sourcing operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors raised by the event sourcing core.
#[derive(Error, Debug)]
pub enum EventError {
    /// A required input was missing or empty
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    /// The object document does not exist
    #[error("Document not found: {name}/{id}")]
    DocumentNotFound {
        /// Object name
        name: String,
        /// Object id
        id: String,
    },

    /// The backing container does not exist
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// An optimistic-concurrency write lost its ETag race
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The stream's document hash no longer matches the document
    #[error("Hash chain broken: stream expects document hash {expected}, document has {actual}")]
    HashChainBroken {
        /// Hash recorded on the stream blob
        expected: String,
        /// Hash of the current object document
        actual: String,
    },

    /// No store is registered under the requested type key
    #[error("Unknown store type: {0}")]
    UnknownStoreType(String),

    /// A version token could not be parsed
    #[error("Invalid version token: {0}")]
    InvalidVersionToken(String),

    /// Deserialization failure or impossible persisted state
    #[error("Processing error: {0}")]
    Processing(String),

    /// Container auto-creation failed
    #[error("Container auto-create failed: {0}")]
    ContainerAutoCreateFailed(String),

    /// Blob storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EventError {
    /// Create an invalid-argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::ArgumentInvalid(msg.into())
    }

    /// Create a processing error.
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a concurrency-conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }
}
