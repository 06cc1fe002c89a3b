//! Configuration options for the event store.

use serde::{Deserialize, Serialize};

/// Default type key stores register under.
pub const DEFAULT_STORE_TYPE: &str = "blob";

/// Options controlling store selection, container naming, and chunking
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventStoreOptions {
    /// Store key used for documents when a stream carries no override
    pub default_document_store: String,
    /// Store key used for snapshots when a stream carries no override
    pub default_snapshot_store: String,
    /// Store key used for document tags when a stream carries no override
    pub default_document_tag_store: String,
    /// Container holding object documents
    pub default_document_container_name: String,
    /// Whether streams are chunked when they carry no explicit settings
    pub enable_stream_chunks: bool,
    /// Chunk size applied when chunking defaults on
    pub default_chunk_size: i64,
    /// Whether missing containers are created on demand
    pub auto_create_container: bool,
    /// Type key of the document store implementation
    pub document_type: String,
    /// Type key of the data store implementation
    pub stream_type: String,
    /// Type key of the document tag store implementation
    pub document_tag_type: String,
    /// Type key of the stream tag store implementation
    pub event_stream_tag_type: String,
}

impl Default for EventStoreOptions {
    fn default() -> Self {
        Self {
            default_document_store: DEFAULT_STORE_TYPE.to_string(),
            default_snapshot_store: DEFAULT_STORE_TYPE.to_string(),
            default_document_tag_store: DEFAULT_STORE_TYPE.to_string(),
            default_document_container_name: "documents".to_string(),
            enable_stream_chunks: false,
            default_chunk_size: 1000,
            auto_create_container: true,
            document_type: DEFAULT_STORE_TYPE.to_string(),
            stream_type: DEFAULT_STORE_TYPE.to_string(),
            document_tag_type: DEFAULT_STORE_TYPE.to_string(),
            event_stream_tag_type: DEFAULT_STORE_TYPE.to_string(),
        }
    }
}
