//! Tag indices mapping user-defined tags to object and stream identifiers.

use crate::config::EventStoreOptions;
use crate::document::ObjectDocument;
use crate::error::{EventError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tidemark_storage::blob::{container_name_for, BlobPath, BlobStore, UploadOptions};
use tidemark_storage::error::StorageError;
use tracing::debug;

/// Bounded attempts for a contended tag update.
const TAG_UPDATE_ATTEMPTS: usize = 5;

/// Sanitize a tag into a blob filename stem: filesystem-hostile characters
/// are stripped, the rest is lowercased. `-` and `_` survive.
pub fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .filter(|c| {
            !matches!(
                c,
                '\\' | '/' | '*' | '?' | '<' | '>' | '|' | '"' | '\r' | '\n' | ':'
            )
        })
        .collect::<String>()
        .to_lowercase()
}

/// Stored form of one tag: the tag and the object ids carrying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDocument {
    /// The tag value as supplied by the application
    pub tag: String,
    /// Object ids carrying the tag, insertion-ordered, no duplicates
    pub object_ids: Vec<String>,
}

/// Which of the two parallel tag indices a store serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Tags on object documents (`tags/document/`)
    Document,
    /// Tags on event streams (`tags/stream-by-tag/`)
    Stream,
}

impl TagKind {
    fn prefix(self) -> &'static str {
        match self {
            TagKind::Document => "tags/document",
            TagKind::Stream => "tags/stream-by-tag",
        }
    }
}

/// Store for one tag index.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Add the document's object id under `tag`. Idempotent.
    async fn set(&self, doc: &ObjectDocument, tag: &str) -> Result<()>;

    /// Object ids carrying `tag`. Best-effort: empty when the tag blob or
    /// its container is absent.
    async fn get(&self, object_name: &str, tag: &str) -> Result<Vec<String>>;

    /// Remove the document's object id from `tag`. Deletes the tag blob
    /// when the last id leaves.
    async fn remove(&self, doc: &ObjectDocument, tag: &str) -> Result<()>;
}

/// Blob-backed [`TagStore`] serving either tag index.
pub struct BlobTagStore {
    store: Arc<dyn BlobStore>,
    kind: TagKind,
    options: EventStoreOptions,
}

impl BlobTagStore {
    /// Create a tag store for the given index kind.
    pub fn new(store: Arc<dyn BlobStore>, kind: TagKind, options: EventStoreOptions) -> Self {
        Self {
            store,
            kind,
            options,
        }
    }

    fn tag_path(&self, object_name: &str, tag: &str) -> BlobPath {
        BlobPath::new(
            container_name_for(object_name),
            format!("{}/{}.json", self.kind.prefix(), sanitize_tag(tag)),
        )
    }

    async fn try_create(&self, path: &BlobPath, tag: &str, object_id: &str) -> Result<bool> {
        let tag_doc = TagDocument {
            tag: tag.to_string(),
            object_ids: vec![object_id.to_string()],
        };
        let body = Bytes::from(serde_json::to_vec(&tag_doc)?);

        match self
            .store
            .upload(path, body, UploadOptions::json().if_none_match_any())
            .await
        {
            Ok(_) => Ok(true),
            // Lost the creation race; fall through to a conditional update.
            Err(StorageError::AlreadyExists(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn validate_tag(tag: &str) -> Result<()> {
        if sanitize_tag(tag).trim().is_empty() {
            return Err(EventError::argument("tag must not be blank"));
        }
        Ok(())
    }
}

#[async_trait]
impl TagStore for BlobTagStore {
    async fn set(&self, doc: &ObjectDocument, tag: &str) -> Result<()> {
        Self::validate_tag(tag)?;
        let path = self.tag_path(&doc.object_name, tag);

        if self.options.auto_create_container {
            self.store
                .create_container_if_absent(&path.container)
                .await
                .map_err(|e| EventError::ContainerAutoCreateFailed(e.to_string()))?;
        }

        for attempt in 0..TAG_UPDATE_ATTEMPTS {
            if !self.store.exists(&path).await? {
                if self.try_create(&path, tag, &doc.object_id).await? {
                    return Ok(());
                }
            }

            let props = match self.store.get_properties(&path).await {
                Ok(props) => props,
                // Deleted between attempts; retry the create.
                Err(StorageError::BlobNotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            };

            let bytes = self.store.download(&path, Some(&props.etag)).await?;
            let mut tag_doc: TagDocument = serde_json::from_slice(&bytes)
                .map_err(|e| EventError::processing(format!("tag blob {path} unreadable: {e}")))?;

            if tag_doc.object_ids.iter().any(|id| id == &doc.object_id) {
                return Ok(());
            }
            tag_doc.object_ids.push(doc.object_id.clone());

            let body = Bytes::from(serde_json::to_vec(&tag_doc)?);
            match self
                .store
                .upload(&path, body, UploadOptions::json().if_match(props.etag))
                .await
            {
                Ok(_) => return Ok(()),
                Err(StorageError::PreconditionFailed(_)) => {
                    debug!(%path, attempt, "tag update contended, retrying");
                    let jitter = rand::thread_rng().gen_range(5..30);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EventError::conflict(format!(
            "tag update for {path} contended beyond {TAG_UPDATE_ATTEMPTS} attempts"
        )))
    }

    async fn get(&self, object_name: &str, tag: &str) -> Result<Vec<String>> {
        Self::validate_tag(tag)?;
        let path = self.tag_path(object_name, tag);

        match self.store.download(&path, None).await {
            Ok(bytes) => {
                let tag_doc: TagDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    EventError::processing(format!("tag blob {path} unreadable: {e}"))
                })?;
                Ok(tag_doc.object_ids)
            }
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, doc: &ObjectDocument, tag: &str) -> Result<()> {
        Self::validate_tag(tag)?;
        let path = self.tag_path(&doc.object_name, tag);

        if !self.store.exists(&path).await? {
            return Ok(());
        }

        let props = match self.store.get_properties(&path).await {
            Ok(props) => props,
            Err(StorageError::BlobNotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let bytes = self.store.download(&path, Some(&props.etag)).await?;
        let mut tag_doc: TagDocument = serde_json::from_slice(&bytes)
            .map_err(|e| EventError::processing(format!("tag blob {path} unreadable: {e}")))?;

        let before = tag_doc.object_ids.len();
        tag_doc.object_ids.retain(|id| id != &doc.object_id);
        if tag_doc.object_ids.len() == before {
            return Ok(());
        }

        if tag_doc.object_ids.is_empty() {
            match self.store.delete(&path, Some(&props.etag)).await {
                Ok(()) => Ok(()),
                Err(StorageError::PreconditionFailed(p)) => Err(EventError::ConcurrencyConflict(p)),
                Err(err) => Err(err.into()),
            }
        } else {
            let body = Bytes::from(serde_json::to_vec(&tag_doc)?);
            match self
                .store
                .upload(&path, body, UploadOptions::json().if_match(props.etag))
                .await
            {
                Ok(_) => Ok(()),
                Err(StorageError::PreconditionFailed(p)) => Err(EventError::ConcurrencyConflict(p)),
                Err(err) => Err(err.into()),
            }
        }
    }
}
