//! Projection persistence with fingerprint-addressed external checkpoints.

use crate::checkpoint::Checkpoint;
use crate::error::{ProjectionError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidemark_events::event::VersionToken;
use tidemark_storage::blob::{BlobPath, BlobStore, Etag, UploadOptions};
use tidemark_storage::error::StorageError;
use tracing::debug;

/// Persisted body of a projection (`<Name>.json`).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionBody {
    name: String,
    schema_version: String,
    /// Fingerprint of the externally stored checkpoint, when one is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checkpoint_fingerprint: Option<String>,
    /// Inline checkpoint, for projections without external checkpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checkpoint: Option<Checkpoint>,
    state: serde_json::Value,
}

/// A loaded projection: read-model state plus the checkpoint of consumed
/// stream positions.
///
/// Instances are only obtainable through [`ProjectionStore::get_or_create`],
/// which reloads the previously accumulated checkpoint. Constructing a
/// fresh instance by hand would silently drop every prior entry, so no
/// public constructor exists.
#[derive(Debug)]
pub struct ProjectionInstance {
    name: String,
    state: serde_json::Value,
    checkpoint: Checkpoint,
    etag: Option<Etag>,
}

impl ProjectionInstance {
    fn new(name: String) -> Self {
        Self {
            name,
            state: serde_json::Value::Object(serde_json::Map::new()),
            checkpoint: Checkpoint::new(),
            etag: None,
        }
    }

    /// Projection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-model state.
    pub fn state(&self) -> &serde_json::Value {
        &self.state
    }

    /// Mutable read-model state, for fold functions.
    pub fn state_mut(&mut self) -> &mut serde_json::Value {
        &mut self.state
    }

    /// The checkpoint of consumed positions.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Record that events up to `token` have been folded for its object.
    pub fn update_checkpoint(&mut self, token: &VersionToken) {
        self.checkpoint.update(token);
    }
}

/// Factory and store for projection instances.
pub struct ProjectionStore {
    store: Arc<dyn BlobStore>,
    container: String,
    external_checkpoints: bool,
}

impl ProjectionStore {
    /// Create a store persisting projections into `container`, using
    /// external fingerprint-addressed checkpoints.
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            external_checkpoints: true,
        }
    }

    /// Toggle external checkpoints; when off, the checkpoint is embedded
    /// in the projection body.
    pub fn with_external_checkpoints(mut self, external: bool) -> Self {
        self.external_checkpoints = external;
        self
    }

    fn body_path(&self, name: &str) -> BlobPath {
        BlobPath::new(self.container.clone(), format!("{name}.json"))
    }

    fn checkpoint_path(&self, name: &str, fingerprint: &str) -> BlobPath {
        BlobPath::new(
            self.container.clone(),
            format!("checkpoints/{name}/{fingerprint}.json"),
        )
    }

    /// Load a projection, or create an empty one when none is stored.
    ///
    /// The returned instance carries the full previously saved checkpoint;
    /// folding continues from where the last save left off.
    pub async fn get_or_create(&self, name: &str) -> Result<ProjectionInstance> {
        let path = self.body_path(name);

        let (bytes, etag) = match self.store.get_properties(&path).await {
            Ok(props) => (
                self.store.download(&path, Some(&props.etag)).await?,
                Some(props.etag),
            ),
            Err(err) if err.is_not_found() => return Ok(ProjectionInstance::new(name.to_string())),
            Err(err) => return Err(err.into()),
        };

        let body: ProjectionBody = serde_json::from_slice(&bytes)
            .map_err(|e| ProjectionError::processing(format!("projection {name} unreadable: {e}")))?;

        let checkpoint = match (&body.checkpoint_fingerprint, body.checkpoint) {
            (Some(fingerprint), _) => {
                let checkpoint_path = self.checkpoint_path(name, fingerprint);
                let bytes = match self.store.download(&checkpoint_path, None).await {
                    Ok(bytes) => bytes,
                    Err(err) if err.is_not_found() => {
                        return Err(ProjectionError::CheckpointMissing {
                            projection: name.to_string(),
                            fingerprint: fingerprint.clone(),
                        })
                    }
                    Err(err) => return Err(err.into()),
                };
                serde_json::from_slice(&bytes).map_err(|e| {
                    ProjectionError::processing(format!(
                        "checkpoint {fingerprint} for {name} unreadable: {e}"
                    ))
                })?
            }
            (None, Some(inline)) => inline,
            (None, None) => Checkpoint::new(),
        };

        Ok(ProjectionInstance {
            name: body.name,
            state: body.state,
            checkpoint,
            etag,
        })
    }

    /// Persist a projection: the checkpoint first (addressed by its
    /// fingerprint, so the write is idempotent), then the body referencing
    /// it.
    pub async fn save(&self, instance: &mut ProjectionInstance) -> Result<()> {
        self.store
            .create_container_if_absent(&self.container)
            .await?;

        let mut body = ProjectionBody {
            name: instance.name.clone(),
            schema_version: "1.0".to_string(),
            checkpoint_fingerprint: None,
            checkpoint: None,
            state: instance.state.clone(),
        };

        if self.external_checkpoints {
            let fingerprint = instance.checkpoint.fingerprint()?;
            let checkpoint_path = self.checkpoint_path(&instance.name, &fingerprint);

            if !self.store.exists(&checkpoint_path).await? {
                let bytes = Bytes::from(instance.checkpoint.canonical_bytes()?);
                match self
                    .store
                    .upload(
                        &checkpoint_path,
                        bytes,
                        UploadOptions::json().if_none_match_any(),
                    )
                    .await
                {
                    // Same fingerprint means same content; a racing writer
                    // already stored the identical checkpoint.
                    Ok(_) | Err(StorageError::AlreadyExists(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                debug!(projection = %instance.name, %fingerprint, "checkpoint written");
            }

            body.checkpoint_fingerprint = Some(fingerprint);
        } else {
            body.checkpoint = Some(instance.checkpoint.clone());
        }

        let options = match instance.etag.clone() {
            Some(etag) => UploadOptions::json().if_match(etag),
            None => UploadOptions::json().if_none_match_any(),
        };

        let path = self.body_path(&instance.name);
        let bytes = Bytes::from(serde_json::to_vec(&body)?);
        match self.store.upload(&path, bytes, options).await {
            Ok(etag) => {
                instance.etag = Some(etag);
                Ok(())
            }
            Err(StorageError::PreconditionFailed(p)) | Err(StorageError::AlreadyExists(p)) => {
                Err(ProjectionError::ConcurrencyConflict(p))
            }
            Err(err) => Err(err.into()),
        }
    }
}
