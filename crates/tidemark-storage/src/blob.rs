//! Blob storage capability set consumed by the event sourcing core.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Opaque entity tag returned by the backend for each blob revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Etag(String);

impl Etag {
    /// Wrap a backend-provided ETag value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Etag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Etag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a lease held on a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseId(String);

impl LeaseId {
    /// Wrap a backend-provided lease id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease state of a blob as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    /// No lease has ever been acquired, or the last lease was released
    Available,
    /// A lease is currently held
    Leased,
    /// The last lease expired without being released
    Expired,
    /// A lease break is in progress
    Breaking,
    /// The last lease was broken
    Broken,
}

/// Location of a blob: a container plus a path within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPath {
    /// Container name
    pub container: String,
    /// Blob name within the container (may contain `/` separators)
    pub blob: String,
}

impl BlobPath {
    /// Create a new blob path.
    pub fn new(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: blob.into(),
        }
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.blob)
    }
}

/// Properties of a stored blob.
#[derive(Debug, Clone)]
pub struct BlobProperties {
    /// Current ETag
    pub etag: Etag,
    /// Current lease state
    pub lease_state: LeaseState,
    /// Size in bytes
    pub content_length: u64,
    /// Last modification timestamp
    pub last_modified: DateTime<Utc>,
}

/// Conditions attached to a write operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteConditions {
    /// Overwrite regardless of the blob's current state
    #[default]
    Unconditional,
    /// Write only when the blob's ETag still matches
    IfMatch(Etag),
    /// Write only when no blob exists at the path (`if-none-match: *`)
    IfNoneMatchAny,
}

/// Options for uploading a blob.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// MIME content type
    pub content_type: String,
    /// Write conditions
    pub conditions: WriteConditions,
    /// Custom metadata key/value pairs
    pub metadata: HashMap<String, String>,
    /// Index tags key/value pairs
    pub tags: HashMap<String, String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
            conditions: WriteConditions::Unconditional,
            metadata: HashMap::new(),
            tags: HashMap::new(),
        }
    }
}

impl UploadOptions {
    /// Options for a JSON document upload.
    pub fn json() -> Self {
        Self {
            content_type: "application/json".to_string(),
            ..Self::default()
        }
    }

    /// Require the blob's ETag to match.
    pub fn if_match(mut self, etag: Etag) -> Self {
        self.conditions = WriteConditions::IfMatch(etag);
        self
    }

    /// Require that no blob exists at the path.
    pub fn if_none_match_any(mut self) -> Self {
        self.conditions = WriteConditions::IfNoneMatchAny;
        self
    }

    /// Attach custom metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach index tags.
    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A single entry in a prefix listing.
#[derive(Debug, Clone)]
pub struct BlobItem {
    /// Blob name within the container
    pub name: String,
    /// ETag, when the backend reports one during listing
    pub etag: Option<Etag>,
    /// Size in bytes
    pub content_length: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct BlobPage {
    /// Items in this page, in lexicographic order
    pub items: Vec<BlobItem>,
    /// Continuation token for the next page, when more items remain
    pub next: Option<String>,
}

/// Capability set the event sourcing core requires from a blob backend.
///
/// Semantics follow Azure-Blob-like conditional semantics: a conditional
/// put rejects with `PreconditionFailed` on ETag mismatch and
/// `AlreadyExists` on an `if-none-match: *` collision; lease acquisition
/// rejects with `LeaseHeld` while a lease is active.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the properties (ETag, lease state) of a blob.
    async fn get_properties(&self, path: &BlobPath) -> StorageResult<BlobProperties>;

    /// Download the blob's bytes, optionally guarded by an ETag.
    async fn download(&self, path: &BlobPath, if_match: Option<&Etag>) -> StorageResult<Bytes>;

    /// Upload bytes, honoring the write conditions in `options`.
    ///
    /// Returns the new ETag on success.
    async fn upload(
        &self,
        path: &BlobPath,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<Etag>;

    /// Delete a blob, optionally guarded by an ETag.
    async fn delete(&self, path: &BlobPath, if_match: Option<&Etag>) -> StorageResult<()>;

    /// Check whether a blob exists. Missing containers count as absent.
    async fn exists(&self, path: &BlobPath) -> StorageResult<bool>;

    /// Create a container when it does not already exist.
    async fn create_container_if_absent(&self, container: &str) -> StorageResult<()>;

    /// List blobs in a container by prefix, one page at a time.
    async fn list_prefix(
        &self,
        container: &str,
        prefix: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> StorageResult<BlobPage>;

    /// Acquire a lease on a blob for the given duration.
    async fn acquire_lease(&self, path: &BlobPath, ttl: Duration) -> StorageResult<LeaseId>;

    /// Renew a held lease.
    async fn renew_lease(&self, path: &BlobPath, lease: &LeaseId) -> StorageResult<()>;

    /// Release a held lease.
    async fn release_lease(&self, path: &BlobPath, lease: &LeaseId) -> StorageResult<()>;

    /// Break any lease on the blob, held or not.
    async fn break_lease(&self, path: &BlobPath) -> StorageResult<()>;
}

/// Derive a valid container name from an object name.
///
/// Container names are lowercase; characters outside `a-z0-9-` are
/// stripped.
pub fn container_name_for(object_name: &str) -> String {
    object_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}
