//! Snapshot store: materialized aggregate state keyed by stream and version.

use crate::config::EventStoreOptions;
use crate::document::{ObjectDocument, SnapshotReference};
use crate::error::{EventError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tidemark_storage::blob::{container_name_for, BlobPath, BlobStore, UploadOptions};

/// Blob name of a snapshot: `snapshot/{streamId}-{version:020}[_{name}].json`.
pub fn snapshot_blob_name(stream_id: &str, until_version: i64, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("snapshot/{stream_id}-{until_version:020}_{name}.json"),
        None => format!("snapshot/{stream_id}-{until_version:020}.json"),
    }
}

/// Store for materialized aggregate state.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the state of the document's active stream as of
    /// `until_version`, recording the snapshot on the document in memory.
    ///
    /// The caller persists the document itself; the upload here is
    /// unconditional since a snapshot for a given version never differs.
    async fn set(
        &self,
        doc: &mut ObjectDocument,
        until_version: i64,
        name: Option<&str>,
        state: Bytes,
    ) -> Result<()>;

    /// Load the snapshot for `until_version`, or `None` when absent.
    async fn get(
        &self,
        doc: &ObjectDocument,
        until_version: i64,
        name: Option<&str>,
    ) -> Result<Option<Bytes>>;
}

/// Blob-backed [`SnapshotStore`].
pub struct BlobSnapshotStore {
    store: Arc<dyn BlobStore>,
    options: EventStoreOptions,
}

impl BlobSnapshotStore {
    /// Create a snapshot store over the given blob backend.
    pub fn new(store: Arc<dyn BlobStore>, options: EventStoreOptions) -> Self {
        Self { store, options }
    }

    fn snapshot_path(doc: &ObjectDocument, until_version: i64, name: Option<&str>) -> BlobPath {
        BlobPath::new(
            container_name_for(&doc.object_name),
            snapshot_blob_name(&doc.active.stream_identifier, until_version, name),
        )
    }
}

#[async_trait]
impl SnapshotStore for BlobSnapshotStore {
    async fn set(
        &self,
        doc: &mut ObjectDocument,
        until_version: i64,
        name: Option<&str>,
        state: Bytes,
    ) -> Result<()> {
        if until_version < 0 {
            return Err(EventError::argument("snapshot version must not be negative"));
        }

        let path = Self::snapshot_path(doc, until_version, name);
        if self.options.auto_create_container {
            self.store
                .create_container_if_absent(&path.container)
                .await
                .map_err(|e| EventError::ContainerAutoCreateFailed(e.to_string()))?;
        }

        self.store.upload(&path, state, UploadOptions::json()).await?;

        let reference = SnapshotReference {
            until_version,
            name: name.map(str::to_string),
        };
        if !doc.active.snapshots.contains(&reference) {
            doc.active.snapshots.push(reference);
        }

        Ok(())
    }

    async fn get(
        &self,
        doc: &ObjectDocument,
        until_version: i64,
        name: Option<&str>,
    ) -> Result<Option<Bytes>> {
        let path = Self::snapshot_path(doc, until_version, name);
        match self.store.download(&path, None).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Strategy for deciding when a caller should persist a snapshot.
pub trait SnapshotStrategy: Send + Sync {
    /// Determine if a snapshot should be taken.
    fn should_snapshot(&self, current_version: i64, last_snapshot_version: i64) -> bool;
}

/// Snapshot every `frequency` events.
pub struct FrequencyStrategy {
    frequency: i64,
}

impl FrequencyStrategy {
    /// Create a new frequency strategy.
    pub fn new(frequency: i64) -> Self {
        Self { frequency }
    }
}

impl SnapshotStrategy for FrequencyStrategy {
    fn should_snapshot(&self, current_version: i64, last_snapshot_version: i64) -> bool {
        current_version - last_snapshot_version >= self.frequency
    }
}

/// Always snapshot (for testing).
pub struct AlwaysStrategy;

impl SnapshotStrategy for AlwaysStrategy {
    fn should_snapshot(&self, _current_version: i64, _last_snapshot_version: i64) -> bool {
        true
    }
}

/// Never snapshot.
pub struct NeverStrategy;

impl SnapshotStrategy for NeverStrategy {
    fn should_snapshot(&self, _current_version: i64, _last_snapshot_version: i64) -> bool {
        false
    }
}
