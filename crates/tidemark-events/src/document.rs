//! Object documents, stream metadata, and the stored stream layout.

use crate::config::EventStoreOptions;
use crate::event::EventRecord;
use serde::{Deserialize, Serialize};
use tidemark_storage::blob::Etag;

/// Chunking configuration for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSettings {
    /// Whether the stream is split into chunk blobs
    pub enable_chunks: bool,
    /// Maximum number of events per chunk
    pub chunk_size: i64,
}

/// A contiguous range of a stream stored as its own blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// Chunk ordinal, starting at 0
    pub chunk_identifier: u32,
    /// First event version stored in the chunk
    pub first_event_version: i64,
    /// Last event version stored in the chunk
    pub last_event_version: i64,
}

/// Reference to a snapshot taken of this stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReference {
    /// Stream version the snapshot covers, inclusive
    pub until_version: i64,
    /// Optional snapshot name for named projections of the same stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Configuration of a single stream belonging to an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamInformation {
    /// Stream identifier (defaults to the object id)
    pub stream_identifier: String,
    /// Type key of the data store handling this stream
    pub stream_type: String,
    /// Version of the last event written to the stream, `-1` when empty
    pub current_stream_version: i64,
    /// Type key of the document store
    pub document_type: String,
    /// Store key for event data
    pub data_store: String,
    /// Store key for snapshots
    pub snapshot_store: String,
    /// Store key for document tags
    pub document_tag_store: String,
    /// Store key for stream tags
    pub stream_tag_store: String,
    /// Connection name for event data
    pub stream_connection_name: String,
    /// Connection name for snapshots
    pub snapshot_connection_name: String,
    /// Connection name for document tags
    pub document_tag_connection_name: String,
    /// Connection name for stream tags
    pub stream_tag_connection_name: String,
    /// Chunking override; absent means the configured default applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_settings: Option<ChunkSettings>,
    /// Chunks written so far, in order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stream_chunks: Vec<StreamChunk>,
    /// Snapshots taken of this stream, in order
    #[serde(rename = "snapShots", skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<SnapshotReference>,
    /// Type key of the document tag index
    pub document_tag_type: String,
    /// Type key of the stream tag index
    pub event_stream_tag_type: String,
    /// Type key of document references
    pub document_ref_type: String,
}

impl Default for StreamInformation {
    fn default() -> Self {
        Self {
            stream_identifier: String::new(),
            stream_type: String::new(),
            current_stream_version: -1,
            document_type: String::new(),
            data_store: String::new(),
            snapshot_store: String::new(),
            document_tag_store: String::new(),
            stream_tag_store: String::new(),
            stream_connection_name: String::new(),
            snapshot_connection_name: String::new(),
            document_tag_connection_name: String::new(),
            stream_tag_connection_name: String::new(),
            chunk_settings: None,
            stream_chunks: Vec::new(),
            snapshots: Vec::new(),
            document_tag_type: String::new(),
            event_stream_tag_type: String::new(),
            document_ref_type: String::new(),
        }
    }
}

impl StreamInformation {
    /// Default stream configuration for a freshly created object.
    pub fn for_object(object_id: impl Into<String>) -> Self {
        Self {
            stream_identifier: object_id.into(),
            ..Self::default()
        }
    }

    /// Chunk settings in effect: the stream's own override, or the
    /// configured default.
    pub fn effective_chunk_settings(&self, options: &EventStoreOptions) -> Option<ChunkSettings> {
        match self.chunk_settings {
            Some(settings) if settings.enable_chunks => Some(settings),
            Some(_) => None,
            None if options.enable_stream_chunks => Some(ChunkSettings {
                enable_chunks: true,
                chunk_size: options.default_chunk_size,
            }),
            None => None,
        }
    }

    /// The last chunk written, when the stream is chunked.
    pub fn last_chunk(&self) -> Option<&StreamChunk> {
        self.stream_chunks.last()
    }

    /// Blob name of a specific chunk of this stream.
    pub fn chunk_blob_name(&self, chunk_identifier: u32) -> String {
        format!("{}-{:010}.json", self.stream_identifier, chunk_identifier)
    }

    /// Blob name of the stream as currently writable: the plain stream
    /// blob, or the last chunk when chunking is in effect.
    pub fn current_blob_name(&self, options: &EventStoreOptions) -> String {
        match self.effective_chunk_settings(options) {
            Some(_) => {
                let chunk = self.last_chunk().map(|c| c.chunk_identifier).unwrap_or(0);
                self.chunk_blob_name(chunk)
            }
            None => format!("{}.json", self.stream_identifier),
        }
    }
}

/// The authoritative per-object metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDocument {
    /// Object id
    pub object_id: String,
    /// Object name (the aggregate kind)
    pub object_name: String,
    /// The currently writable stream configuration
    pub active: StreamInformation,
    /// Streams moved out of `active`, append-only and never resurrected
    #[serde(default)]
    pub terminated_streams: Vec<StreamInformation>,
    /// Document schema version
    pub schema_version: String,
    /// SHA-256 of this document's canonical body
    #[serde(default)]
    pub hash: String,
    /// Hash of the previous revision of this document
    #[serde(default)]
    pub prev_hash: String,
    /// Informational path of this document within its container
    #[serde(default)]
    pub document_path: String,

    /// ETag observed when this document revision was read or written.
    #[serde(skip)]
    pub(crate) etag: Option<Etag>,
}

impl ObjectDocument {
    /// Synthesize a fresh document for an object that has no stored state.
    pub fn new(object_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        let object_name = object_name.into();
        let object_id = object_id.into();
        let document_path = format!("{}/{}.json", object_name.to_lowercase(), object_id);

        Self {
            active: StreamInformation::for_object(object_id.clone()),
            object_id,
            object_name,
            terminated_streams: Vec::new(),
            schema_version: "1.0".to_string(),
            hash: String::new(),
            prev_hash: String::new(),
            document_path,
            etag: None,
        }
    }

    /// The ETag of the revision this document was loaded from, when known.
    pub fn etag(&self) -> Option<&Etag> {
        self.etag.as_ref()
    }

    /// Move the active stream to `terminated_streams` and install a new
    /// active configuration. Terminated streams are never resurrected.
    pub fn replace_active_stream(&mut self, new_active: StreamInformation) {
        let old = std::mem::replace(&mut self.active, new_active);
        self.terminated_streams.push(old);
    }
}

/// The stored event log blob for a stream (or one chunk of it).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDocument {
    /// Object id
    pub object_id: String,
    /// Object name
    pub object_name: String,
    /// Hash of the object document this stream is bound to; `"*"` means
    /// unbound
    pub last_object_document_hash: String,
    /// Events stored in this blob, in version order
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

impl StreamDocument {
    /// Create an empty stream document bound to the given document hash.
    pub fn new(
        object_id: impl Into<String>,
        object_name: impl Into<String>,
        last_object_document_hash: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            object_name: object_name.into(),
            last_object_document_hash: last_object_document_hash.into(),
            events: Vec::new(),
        }
    }
}
