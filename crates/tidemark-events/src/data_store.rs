//! Event data store: append-only stream blobs with optimistic concurrency.

use crate::config::EventStoreOptions;
use crate::document::{ChunkSettings, ObjectDocument, StreamChunk, StreamDocument};
use crate::error::{EventError, Result};
use crate::event::{EventRecord, PendingEvent, VersionToken};
use crate::hash::{chain_matches, UNBOUND_HASH};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tidemark_storage::blob::{container_name_for, BlobPath, BlobStore, Etag, UploadOptions};
use tidemark_storage::error::StorageError;
use tracing::{debug, instrument};

/// How many times a lost `if-none-match: *` race is retried by reloading
/// the blob another writer created.
const CREATE_RACE_RETRIES: usize = 2;

/// Store for the event log blobs of a stream.
#[async_trait]
pub trait EventDataStore: Send + Sync {
    /// Append events to the document's active stream.
    ///
    /// Assigns each event the next stream version, verifies the
    /// document/stream hash chain, rolls chunks when the active chunk is
    /// full, and updates `doc.active` bookkeeping in memory on success.
    async fn append(
        &self,
        doc: &mut ObjectDocument,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<VersionToken>>;

    /// Read events of the active stream, filtered to the inclusive
    /// `[start_version, end_version]` range.
    ///
    /// Returns an empty sequence when the stream blob does not exist. A
    /// `chunk` override reads exactly that chunk blob.
    async fn read(
        &self,
        doc: &ObjectDocument,
        start_version: Option<i64>,
        end_version: Option<i64>,
        chunk: Option<u32>,
    ) -> Result<Vec<EventRecord>>;
}

/// Blob-backed [`EventDataStore`].
pub struct BlobEventDataStore {
    store: Arc<dyn BlobStore>,
    options: EventStoreOptions,
}

impl BlobEventDataStore {
    /// Create a data store over the given blob backend.
    pub fn new(store: Arc<dyn BlobStore>, options: EventStoreOptions) -> Self {
        Self { store, options }
    }

    fn container_for(doc: &ObjectDocument) -> String {
        container_name_for(&doc.object_name)
    }

    /// The hash a freshly created stream blob is bound to: the document's
    /// hash, or the unbound sentinel for documents that have never been
    /// hashed.
    fn binding_hash(doc: &ObjectDocument) -> String {
        if doc.hash.is_empty() {
            UNBOUND_HASH.to_string()
        } else {
            doc.hash.clone()
        }
    }

    /// Load the stream blob for appending, or prepare a fresh document
    /// when the blob does not exist yet. `None` etag means the blob must
    /// be created with `if-none-match: *`.
    async fn load_stream(
        &self,
        doc: &ObjectDocument,
        path: &BlobPath,
    ) -> Result<(StreamDocument, Option<Etag>)> {
        if !self.store.exists(path).await? {
            return Ok((
                StreamDocument::new(&doc.object_id, &doc.object_name, Self::binding_hash(doc)),
                None,
            ));
        }

        let props = self.store.get_properties(path).await?;
        let bytes = self.store.download(path, Some(&props.etag)).await?;
        let stream: StreamDocument = serde_json::from_slice(&bytes)
            .map_err(|e| EventError::processing(format!("stream blob {path} unreadable: {e}")))?;

        if !chain_matches(&stream.last_object_document_hash, &doc.hash) {
            return Err(EventError::HashChainBroken {
                expected: stream.last_object_document_hash,
                actual: doc.hash.clone(),
            });
        }

        Ok((stream, Some(props.etag)))
    }

    /// Append `new_events` to the blob at `path`, creating it when absent.
    ///
    /// A lost creation race (another writer created the blob between our
    /// existence check and upload) reloads and retries; a lost ETag race
    /// surfaces as a concurrency conflict for the caller to resolve.
    async fn append_to_blob(
        &self,
        doc: &ObjectDocument,
        path: &BlobPath,
        new_events: &[EventRecord],
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            let (mut stream, etag) = self.load_stream(doc, path).await?;
            stream.events.extend_from_slice(new_events);

            let body = Bytes::from(serde_json::to_vec(&stream)?);
            let options = match &etag {
                Some(etag) => UploadOptions::json().if_match(etag.clone()),
                None => UploadOptions::json().if_none_match_any(),
            };

            match self.store.upload(path, body, options).await {
                Ok(_) => return Ok(()),
                Err(StorageError::AlreadyExists(_))
                    if etag.is_none() && attempt < CREATE_RACE_RETRIES =>
                {
                    debug!(%path, "stream blob created concurrently, reloading");
                    attempt += 1;
                }
                Err(StorageError::AlreadyExists(p)) | Err(StorageError::PreconditionFailed(p)) => {
                    return Err(EventError::ConcurrencyConflict(p))
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Create a brand-new successor chunk blob holding `events`.
    async fn create_chunk_blob(
        &self,
        doc: &ObjectDocument,
        path: &BlobPath,
        binding_hash: &str,
        events: Vec<EventRecord>,
    ) -> Result<()> {
        let mut stream = StreamDocument::new(&doc.object_id, &doc.object_name, binding_hash);
        stream.events = events;

        let body = Bytes::from(serde_json::to_vec(&stream)?);
        match self
            .store
            .upload(path, body, UploadOptions::json().if_none_match_any())
            .await
        {
            Ok(_) => Ok(()),
            // A concurrent writer rolled to the same chunk first.
            Err(StorageError::AlreadyExists(p)) => Err(EventError::ConcurrencyConflict(p)),
            Err(err) => Err(err.into()),
        }
    }

    async fn append_plain(
        &self,
        doc: &ObjectDocument,
        container: &str,
        records: &[EventRecord],
    ) -> Result<()> {
        let path = BlobPath::new(container, format!("{}.json", doc.active.stream_identifier));
        self.append_to_blob(doc, &path, records).await
    }

    async fn append_chunked(
        &self,
        doc: &mut ObjectDocument,
        container: &str,
        settings: ChunkSettings,
        records: Vec<EventRecord>,
    ) -> Result<()> {
        if doc.active.stream_chunks.is_empty() {
            doc.active.stream_chunks.push(StreamChunk {
                chunk_identifier: 0,
                first_event_version: doc.active.current_stream_version + 1,
                last_event_version: doc.active.current_stream_version,
            });
        }

        let binding_hash = Self::binding_hash(doc);
        let mut remaining: VecDeque<EventRecord> = records.into();

        // Fill whatever room the active chunk has left.
        let active = *doc
            .active
            .stream_chunks
            .last()
            .expect("chunk bookkeeping initialized above");
        let stored = active.last_event_version - active.first_event_version + 1;
        let capacity = (settings.chunk_size - stored).max(0) as usize;

        if capacity > 0 && !remaining.is_empty() {
            let take = capacity.min(remaining.len());
            let tail: Vec<EventRecord> = remaining.drain(..take).collect();
            let path = BlobPath::new(
                container,
                doc.active.chunk_blob_name(active.chunk_identifier),
            );

            self.append_to_blob(doc, &path, &tail).await?;

            let last = doc
                .active
                .stream_chunks
                .last_mut()
                .expect("chunk bookkeeping initialized above");
            last.last_event_version = tail.last().expect("tail is non-empty").event_version;
        }

        // Roll the remainder into successor chunks.
        while !remaining.is_empty() {
            let previous = *doc
                .active
                .stream_chunks
                .last()
                .expect("chunk bookkeeping initialized above");
            let take = (settings.chunk_size.max(1) as usize).min(remaining.len());
            let batch: Vec<EventRecord> = remaining.drain(..take).collect();

            let chunk = StreamChunk {
                chunk_identifier: previous.chunk_identifier + 1,
                first_event_version: batch.first().expect("batch is non-empty").event_version,
                last_event_version: batch.last().expect("batch is non-empty").event_version,
            };
            let path = BlobPath::new(container, doc.active.chunk_blob_name(chunk.chunk_identifier));

            debug!(%path, chunk = chunk.chunk_identifier, "rolling stream to new chunk");
            self.create_chunk_blob(doc, &path, &binding_hash, batch).await?;
            doc.active.stream_chunks.push(chunk);
        }

        Ok(())
    }
}

#[async_trait]
impl EventDataStore for BlobEventDataStore {
    #[instrument(skip(self, doc, events), fields(object = %doc.object_name, id = %doc.object_id))]
    async fn append(
        &self,
        doc: &mut ObjectDocument,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<VersionToken>> {
        if events.is_empty() {
            return Err(EventError::argument("events must not be empty"));
        }
        if doc.active.stream_identifier.trim().is_empty() {
            return Err(EventError::argument("active stream identifier must not be blank"));
        }

        let container = Self::container_for(doc);
        if self.options.auto_create_container {
            self.store
                .create_container_if_absent(&container)
                .await
                .map_err(|e| EventError::ContainerAutoCreateFailed(e.to_string()))?;
        }

        let first_version = doc.active.current_stream_version + 1;
        let records: Vec<EventRecord> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| event.into_record(first_version + i as i64))
            .collect();
        let tokens: Vec<VersionToken> = records
            .iter()
            .map(|record| {
                VersionToken::new(
                    &doc.object_name,
                    &doc.object_id,
                    &doc.active.stream_identifier,
                    record.event_version,
                )
            })
            .collect();

        match doc.active.effective_chunk_settings(&self.options) {
            None => self.append_plain(doc, &container, &records).await?,
            Some(settings) => self.append_chunked(doc, &container, settings, records).await?,
        }

        doc.active.current_stream_version = tokens
            .last()
            .expect("tokens mirror the non-empty event list")
            .version;

        Ok(tokens)
    }

    async fn read(
        &self,
        doc: &ObjectDocument,
        start_version: Option<i64>,
        end_version: Option<i64>,
        chunk: Option<u32>,
    ) -> Result<Vec<EventRecord>> {
        let container = Self::container_for(doc);
        let start = start_version.unwrap_or(i64::MIN);
        let end = end_version.unwrap_or(i64::MAX);

        let paths: Vec<BlobPath> = match (chunk, doc.active.effective_chunk_settings(&self.options))
        {
            (Some(chunk), _) => {
                vec![BlobPath::new(&container, doc.active.chunk_blob_name(chunk))]
            }
            (None, Some(_)) if !doc.active.stream_chunks.is_empty() => doc
                .active
                .stream_chunks
                .iter()
                .filter(|c| c.first_event_version <= end && c.last_event_version >= start)
                .map(|c| BlobPath::new(&container, doc.active.chunk_blob_name(c.chunk_identifier)))
                .collect(),
            (None, Some(_)) => {
                vec![BlobPath::new(&container, doc.active.chunk_blob_name(0))]
            }
            (None, None) => vec![BlobPath::new(
                &container,
                format!("{}.json", doc.active.stream_identifier),
            )],
        };

        let mut events = Vec::new();
        for path in paths {
            match self.store.download(&path, None).await {
                Ok(bytes) => {
                    let stream: StreamDocument = serde_json::from_slice(&bytes).map_err(|e| {
                        EventError::processing(format!("stream blob {path} unreadable: {e}"))
                    })?;
                    events.extend(stream.events);
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        events.retain(|e| e.event_version >= start && e.event_version <= end);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::document_hash;
    use tidemark_storage::memory::InMemoryBlobStore;

    fn data_store(store: Arc<InMemoryBlobStore>) -> BlobEventDataStore {
        BlobEventDataStore::new(store, EventStoreOptions::default())
    }

    fn chunked_data_store(store: Arc<InMemoryBlobStore>, chunk_size: i64) -> BlobEventDataStore {
        let options = EventStoreOptions {
            enable_stream_chunks: true,
            default_chunk_size: chunk_size,
            ..EventStoreOptions::default()
        };
        BlobEventDataStore::new(store, options)
    }

    fn pending(n: usize) -> Vec<PendingEvent> {
        (0..n)
            .map(|i| PendingEvent::new("Created", format!("{{\"n\":{i}}}")))
            .collect()
    }

    #[tokio::test]
    async fn test_append_assigns_versions_from_zero() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store);
        let mut doc = ObjectDocument::new("order", "o-1");

        let tokens = data.append(&mut doc, pending(3)).await.unwrap();

        let versions: Vec<i64> = tokens.iter().map(|t| t.version).collect();
        assert_eq!(versions, vec![0, 1, 2]);
        assert_eq!(doc.active.current_stream_version, 2);
    }

    #[tokio::test]
    async fn test_append_then_read_round_trip() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store);
        let mut doc = ObjectDocument::new("order", "o-1");

        data.append(&mut doc, pending(5)).await.unwrap();
        data.append(&mut doc, pending(2)).await.unwrap();

        let all = data.read(&doc, None, None, None).await.unwrap();
        assert_eq!(all.len(), 7);
        let versions: Vec<i64> = all.iter().map(|e| e.event_version).collect();
        assert_eq!(versions, (0..7).collect::<Vec<i64>>());

        let window = data.read(&doc, Some(2), Some(4), None).await.unwrap();
        let versions: Vec<i64> = window.iter().map(|e| e.event_version).collect();
        assert_eq!(versions, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_events() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store);
        let mut doc = ObjectDocument::new("order", "o-1");

        let err = data.append(&mut doc, Vec::new()).await.unwrap_err();
        assert!(matches!(err, EventError::ArgumentInvalid(_)));
    }

    #[tokio::test]
    async fn test_append_rejects_blank_stream() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store);
        let mut doc = ObjectDocument::new("order", "o-1");
        doc.active.stream_identifier = "  ".to_string();

        let err = data.append(&mut doc, pending(1)).await.unwrap_err();
        assert!(matches!(err, EventError::ArgumentInvalid(_)));
    }

    #[tokio::test]
    async fn test_read_missing_stream_is_empty() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store);
        let doc = ObjectDocument::new("order", "o-1");

        let events = data.read(&doc, None, None, None).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_hash_chain_mismatch_is_fatal() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store.clone());

        // Bind the stream to one document revision.
        let mut doc = ObjectDocument::new("order", "o-1");
        doc.hash = document_hash(&doc).unwrap();
        data.append(&mut doc, pending(1)).await.unwrap();

        // A different document revision (out-of-band mutation) must not
        // silently append.
        let mut stale = ObjectDocument::new("order", "o-1");
        stale.hash = "0000000000000000000000000000000000000000000000000000000000000000".into();
        let err = data.append(&mut stale, pending(1)).await.unwrap_err();
        assert!(matches!(err, EventError::HashChainBroken { .. }));
    }

    #[tokio::test]
    async fn test_unbound_stream_accepts_any_document() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = data_store(store);

        // First writer has no document hash: the stream binds to "*".
        let mut legacy = ObjectDocument::new("order", "o-1");
        data.append(&mut legacy, pending(1)).await.unwrap();

        let mut doc = ObjectDocument::new("order", "o-1");
        doc.hash = document_hash(&doc).unwrap();
        let tokens = data.append(&mut doc, pending(1)).await.unwrap();
        assert_eq!(tokens[0].version, 1);
    }

    #[tokio::test]
    async fn test_chunk_roll_splits_across_blobs() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = chunked_data_store(store.clone(), 100);
        let mut doc = ObjectDocument::new("order", "o-1");

        data.append(&mut doc, pending(100)).await.unwrap();
        data.append(&mut doc, pending(50)).await.unwrap();

        assert_eq!(doc.active.stream_chunks.len(), 2);
        let chunks = &doc.active.stream_chunks;
        assert_eq!(
            (chunks[0].first_event_version, chunks[0].last_event_version),
            (0, 99)
        );
        assert_eq!(
            (chunks[1].first_event_version, chunks[1].last_event_version),
            (100, 149)
        );
        // Chunk continuity: each chunk starts where the previous ended.
        assert_eq!(chunks[0].last_event_version + 1, chunks[1].first_event_version);

        let container = "order";
        assert!(store
            .exists(&BlobPath::new(container, "o-1-0000000000.json"))
            .await
            .unwrap());
        assert!(store
            .exists(&BlobPath::new(container, "o-1-0000000001.json"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_chunk_roll_within_single_append() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = chunked_data_store(store, 10);
        let mut doc = ObjectDocument::new("order", "o-1");

        data.append(&mut doc, pending(25)).await.unwrap();

        assert_eq!(doc.active.stream_chunks.len(), 3);
        assert_eq!(doc.active.current_stream_version, 24);

        let all = data.read(&doc, None, None, None).await.unwrap();
        let versions: Vec<i64> = all.iter().map(|e| e.event_version).collect();
        assert_eq!(versions, (0..25).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_read_single_chunk_override() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = chunked_data_store(store, 10);
        let mut doc = ObjectDocument::new("order", "o-1");

        data.append(&mut doc, pending(25)).await.unwrap();

        let chunk1 = data.read(&doc, None, None, Some(1)).await.unwrap();
        let versions: Vec<i64> = chunk1.iter().map(|e| e.event_version).collect();
        assert_eq!(versions, (10..20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_concurrent_chunk_roll_conflicts() {
        let store = Arc::new(InMemoryBlobStore::new());
        let data = chunked_data_store(store.clone(), 10);
        let mut doc = ObjectDocument::new("order", "o-1");

        data.append(&mut doc, pending(10)).await.unwrap();

        // Another writer already rolled to chunk 1.
        let occupied = StreamDocument::new("o-1", "order", UNBOUND_HASH);
        store
            .upload(
                &BlobPath::new("order", "o-1-0000000001.json"),
                Bytes::from(serde_json::to_vec(&occupied).unwrap()),
                UploadOptions::json(),
            )
            .await
            .unwrap();

        let err = data.append(&mut doc, pending(5)).await.unwrap_err();
        assert!(matches!(err, EventError::ConcurrencyConflict(_)));
    }
}
