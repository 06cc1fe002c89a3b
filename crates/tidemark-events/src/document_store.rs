//! Object document store: authoritative per-object metadata.

use crate::config::EventStoreOptions;
use crate::document::{ObjectDocument, StreamDocument, StreamInformation};
use crate::error::{EventError, Result};
use crate::hash::document_hash;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tidemark_storage::blob::{container_name_for, BlobPath, BlobStore, UploadOptions};
use tidemark_storage::error::StorageError;
use tracing::{debug, instrument};

/// Store for [`ObjectDocument`]s.
#[async_trait]
pub trait ObjectDocumentStore: Send + Sync {
    /// Create the document for an object, or return the existing one.
    ///
    /// Returns `None` only when a backend hands back an empty document
    /// body, which some object stores have been observed to do.
    async fn create(&self, object_name: &str, object_id: &str) -> Result<Option<ObjectDocument>>;

    /// Load the document for an object.
    ///
    /// Missing documents raise [`EventError::DocumentNotFound`]; an empty
    /// stored body yields `Ok(None)`.
    async fn get(&self, object_name: &str, object_id: &str) -> Result<Option<ObjectDocument>>;

    /// Load the document, creating it when absent.
    async fn get_or_create(&self, object_name: &str, object_id: &str) -> Result<ObjectDocument>;

    /// Persist the document, advancing its hash chain.
    ///
    /// On success the document's `prev_hash`, `hash`, and tracked ETag are
    /// updated in place.
    async fn set(&self, doc: &mut ObjectDocument) -> Result<()>;

    /// Replace properties of the active stream configuration while keeping
    /// the document/stream hash chain intact, so the next append does not
    /// fail its concurrency check.
    ///
    /// The `stream_identifier` of the active stream is always preserved.
    async fn update_active_configuration(
        &self,
        object_name: &str,
        object_id: &str,
        corrected: StreamInformation,
    ) -> Result<ObjectDocument>;

    /// Like [`update_active_configuration`], mutating the active stream
    /// through a callback instead of replacing it.
    ///
    /// [`update_active_configuration`]: ObjectDocumentStore::update_active_configuration
    async fn update_active_configuration_with(
        &self,
        object_name: &str,
        object_id: &str,
        configure: &(dyn for<'a> Fn(&'a mut StreamInformation) + Send + Sync),
    ) -> Result<ObjectDocument>;
}

/// Blob-backed [`ObjectDocumentStore`].
pub struct BlobObjectDocumentStore {
    documents: Arc<dyn BlobStore>,
    streams: Arc<dyn BlobStore>,
    options: EventStoreOptions,
}

impl BlobObjectDocumentStore {
    /// Create a document store whose documents and stream blobs live in
    /// the same backend.
    pub fn new(store: Arc<dyn BlobStore>, options: EventStoreOptions) -> Self {
        Self {
            documents: store.clone(),
            streams: store,
            options,
        }
    }

    /// Route stream blobs to a different backend than documents.
    pub fn with_stream_store(mut self, streams: Arc<dyn BlobStore>) -> Self {
        self.streams = streams;
        self
    }

    fn document_path(&self, object_name: &str, object_id: &str) -> BlobPath {
        BlobPath::new(
            self.options.default_document_container_name.clone(),
            format!("{}/{}.json", object_name.to_lowercase(), object_id),
        )
    }

    fn require_identity(object_name: &str, object_id: &str) -> Result<()> {
        if object_name.trim().is_empty() {
            return Err(EventError::argument("object name must not be blank"));
        }
        if object_id.trim().is_empty() {
            return Err(EventError::argument("object id must not be blank"));
        }
        Ok(())
    }

    /// Serialize and upload the document, then advance its hash chain and
    /// ETag in place. The hash fields are only mutated once the upload has
    /// committed.
    async fn persist(&self, doc: &mut ObjectDocument) -> Result<()> {
        let prev_hash = doc.hash.clone();
        let hash = document_hash(doc)?;

        let mut outgoing = doc.clone();
        outgoing.prev_hash = prev_hash.clone();
        outgoing.hash = hash.clone();
        let body = Bytes::from(serde_json::to_vec(&outgoing)?);

        let path = self.document_path(&doc.object_name, &doc.object_id);
        let options = match doc.etag.clone() {
            Some(etag) => UploadOptions::json().if_match(etag),
            None => UploadOptions::json().if_none_match_any(),
        };

        let etag = match self.documents.upload(&path, body, options).await {
            Ok(etag) => etag,
            Err(StorageError::PreconditionFailed(p)) | Err(StorageError::AlreadyExists(p)) => {
                return Err(EventError::ConcurrencyConflict(p))
            }
            Err(StorageError::ContainerNotFound(c)) => {
                return Err(EventError::ContainerNotFound(c))
            }
            Err(err) => return Err(err.into()),
        };

        doc.prev_hash = prev_hash;
        doc.hash = hash;
        doc.etag = Some(etag);
        Ok(())
    }

    /// Re-point the stream head at the document's new hash, using the OLD
    /// active configuration to locate the blob: only the metadata that
    /// refers to the stream has changed, not the stream's physical
    /// location.
    async fn resync_stream_hash(
        &self,
        doc: &ObjectDocument,
        old_active: &StreamInformation,
    ) -> Result<()> {
        let path = BlobPath::new(
            container_name_for(&doc.object_name),
            old_active.current_blob_name(&self.options),
        );

        let props = match self.streams.get_properties(&path).await {
            Ok(props) => props,
            // No stream blob yet: nothing to re-point.
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let bytes = self.streams.download(&path, Some(&props.etag)).await?;
        let mut stream: StreamDocument = serde_json::from_slice(&bytes)
            .map_err(|e| EventError::processing(format!("stream blob {path} unreadable: {e}")))?;
        stream.last_object_document_hash = doc.hash.clone();

        let body = Bytes::from(serde_json::to_vec(&stream)?);
        match self
            .streams
            .upload(&path, body, UploadOptions::json().if_match(props.etag))
            .await
        {
            Ok(_) => {
                debug!(%path, hash = %doc.hash, "stream head re-bound to new document hash");
                Ok(())
            }
            Err(StorageError::PreconditionFailed(p)) => Err(EventError::ConcurrencyConflict(p)),
            Err(err) => Err(err.into()),
        }
    }

    async fn apply_active_mutation(
        &self,
        object_name: &str,
        object_id: &str,
        mutate: &(dyn for<'a> Fn(&'a mut StreamInformation) + Send + Sync),
    ) -> Result<ObjectDocument> {
        Self::require_identity(object_name, object_id)?;

        let mut doc = self
            .get(object_name, object_id)
            .await?
            .ok_or_else(|| EventError::processing("stored document body is empty"))?;

        let old_active = doc.active.clone();

        mutate(&mut doc.active);
        // The stream identity is never changed by a configuration update.
        doc.active.stream_identifier = old_active.stream_identifier.clone();

        self.persist(&mut doc).await?;
        self.resync_stream_hash(&doc, &old_active).await?;

        Ok(doc)
    }
}

#[async_trait]
impl ObjectDocumentStore for BlobObjectDocumentStore {
    #[instrument(skip(self), fields(object = object_name, id = object_id))]
    async fn create(&self, object_name: &str, object_id: &str) -> Result<Option<ObjectDocument>> {
        Self::require_identity(object_name, object_id)?;

        let path = self.document_path(object_name, object_id);
        if self.documents.exists(&path).await? {
            return self.get(object_name, object_id).await;
        }

        if self.options.auto_create_container {
            self.documents
                .create_container_if_absent(&path.container)
                .await
                .map_err(|e| EventError::ContainerAutoCreateFailed(e.to_string()))?;
        }

        let mut doc = ObjectDocument::new(object_name, object_id);
        doc.hash = document_hash(&doc)?;
        let body = Bytes::from(serde_json::to_vec(&doc)?);

        match self
            .documents
            .upload(&path, body, UploadOptions::json().if_none_match_any())
            .await
        {
            Ok(etag) => {
                doc.etag = Some(etag);
                Ok(Some(doc))
            }
            // Another creator won the race; theirs is the document.
            Err(StorageError::AlreadyExists(_)) => self.get(object_name, object_id).await,
            Err(StorageError::ContainerNotFound(c)) => Err(EventError::ContainerNotFound(c)),
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, object_name: &str, object_id: &str) -> Result<Option<ObjectDocument>> {
        Self::require_identity(object_name, object_id)?;

        let path = self.document_path(object_name, object_id);
        let props = match self.documents.get_properties(&path).await {
            Ok(props) => props,
            Err(StorageError::BlobNotFound(_)) => {
                return Err(EventError::DocumentNotFound {
                    name: object_name.to_string(),
                    id: object_id.to_string(),
                })
            }
            Err(StorageError::ContainerNotFound(c)) => {
                return Err(EventError::ContainerNotFound(c))
            }
            Err(err) => return Err(err.into()),
        };

        let bytes = self.documents.download(&path, Some(&props.etag)).await?;
        if bytes.is_empty() || bytes.as_ref() == b"null" {
            return Ok(None);
        }

        let mut doc: ObjectDocument = serde_json::from_slice(&bytes)
            .map_err(|e| EventError::processing(format!("document {path} unreadable: {e}")))?;
        doc.etag = Some(props.etag);
        Ok(Some(doc))
    }

    async fn get_or_create(&self, object_name: &str, object_id: &str) -> Result<ObjectDocument> {
        match self.get(object_name, object_id).await {
            Ok(Some(doc)) => return Ok(doc),
            Ok(None) => {
                return Err(EventError::processing(format!(
                    "document {object_name}/{object_id} has an empty body"
                )))
            }
            Err(EventError::DocumentNotFound { .. }) | Err(EventError::ContainerNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        self.create(object_name, object_id).await?.ok_or_else(|| {
            EventError::processing(format!(
                "document {object_name}/{object_id} has an empty body"
            ))
        })
    }

    async fn set(&self, doc: &mut ObjectDocument) -> Result<()> {
        Self::require_identity(&doc.object_name, &doc.object_id)?;
        self.persist(doc).await
    }

    #[instrument(skip(self, corrected), fields(object = object_name, id = object_id))]
    async fn update_active_configuration(
        &self,
        object_name: &str,
        object_id: &str,
        corrected: StreamInformation,
    ) -> Result<ObjectDocument> {
        self.apply_active_mutation(object_name, object_id, &move |active| {
            *active = corrected.clone();
        })
        .await
    }

    async fn update_active_configuration_with(
        &self,
        object_name: &str,
        object_id: &str,
        configure: &(dyn for<'a> Fn(&'a mut StreamInformation) + Send + Sync),
    ) -> Result<ObjectDocument> {
        self.apply_active_mutation(object_name, object_id, configure)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_storage::memory::InMemoryBlobStore;

    fn document_store(store: Arc<InMemoryBlobStore>) -> BlobObjectDocumentStore {
        BlobObjectDocumentStore::new(store, EventStoreOptions::default())
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        let first = docs.create("order", "o-1").await.unwrap().unwrap();
        let second = docs.create("order", "o-1").await.unwrap().unwrap();

        assert_eq!(first.hash, second.hash);
        assert_eq!(second.active.stream_identifier, "o-1");
    }

    #[tokio::test]
    async fn test_get_missing_document_raises() {
        let store = Arc::new(InMemoryBlobStore::with_containers(&["documents"]));
        let docs = document_store(store);

        let err = docs.get("order", "absent").await.unwrap_err();
        assert!(matches!(err, EventError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_container_raises() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        let err = docs.get("order", "o-1").await.unwrap_err();
        assert!(matches!(err, EventError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_blank_identity_rejected() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        assert!(matches!(
            docs.get("", "o-1").await.unwrap_err(),
            EventError::ArgumentInvalid(_)
        ));
        assert!(matches!(
            docs.create("order", " ").await.unwrap_err(),
            EventError::ArgumentInvalid(_)
        ));
    }

    #[tokio::test]
    async fn test_set_advances_hash_chain() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        let mut doc = docs.get_or_create("order", "o-1").await.unwrap();
        let created_hash = doc.hash.clone();

        doc.schema_version = "1.1".to_string();
        docs.set(&mut doc).await.unwrap();

        assert_eq!(doc.prev_hash, created_hash);
        assert_ne!(doc.hash, created_hash);

        let reloaded = docs.get("order", "o-1").await.unwrap().unwrap();
        assert_eq!(reloaded.hash, doc.hash);
        assert_eq!(reloaded.prev_hash, created_hash);
    }

    #[tokio::test]
    async fn test_set_detects_concurrent_writer() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        let mut stale = docs.get_or_create("order", "o-1").await.unwrap();

        let mut winner = docs.get("order", "o-1").await.unwrap().unwrap();
        winner.schema_version = "2.0".to_string();
        docs.set(&mut winner).await.unwrap();

        stale.schema_version = "3.0".to_string();
        let err = docs.set(&mut stale).await.unwrap_err();
        assert!(matches!(err, EventError::ConcurrencyConflict(_)));
    }

    #[tokio::test]
    async fn test_failed_set_leaves_hash_untouched() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        let mut stale = docs.get_or_create("order", "o-1").await.unwrap();
        let hash_before = stale.hash.clone();

        let mut winner = docs.get("order", "o-1").await.unwrap().unwrap();
        docs.set(&mut winner).await.unwrap();

        let _ = docs.set(&mut stale).await.unwrap_err();
        assert_eq!(stale.hash, hash_before);
    }

    #[tokio::test]
    async fn test_update_active_configuration_preserves_stream_identity() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        docs.get_or_create("order", "o-1").await.unwrap();

        let mut corrected = StreamInformation::for_object("hijacked");
        corrected.document_tag_store = "store-a".to_string();

        let updated = docs
            .update_active_configuration("order", "o-1", corrected)
            .await
            .unwrap();

        assert_eq!(updated.active.stream_identifier, "o-1");
        assert_eq!(updated.active.document_tag_store, "store-a");
    }

    #[tokio::test]
    async fn test_update_with_callback() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        docs.get_or_create("order", "o-1").await.unwrap();

        let updated = docs
            .update_active_configuration_with("order", "o-1", &|active| {
                active.snapshot_store = "cold".to_string();
            })
            .await
            .unwrap();

        assert_eq!(updated.active.snapshot_store, "cold");

        let reloaded = docs.get("order", "o-1").await.unwrap().unwrap();
        assert_eq!(reloaded.active.snapshot_store, "cold");
    }

    #[tokio::test]
    async fn test_update_without_stream_blob_skips_resync() {
        let store = Arc::new(InMemoryBlobStore::new());
        let docs = document_store(store);

        docs.get_or_create("order", "o-1").await.unwrap();

        // No stream blob exists yet; the migration must still succeed.
        docs.update_active_configuration_with("order", "o-1", &|active| {
            active.data_store = "blob".to_string();
        })
        .await
        .unwrap();
    }
}
