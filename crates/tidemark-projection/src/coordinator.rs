//! Projection coordinator: the status lifecycle and its rebuild tokens.

use crate::error::{ProjectionError, Result};
use crate::status::{ProjectionStatus, RebuildPhase, RebuildStrategy, RebuildToken, StatusDocument};
use bytes::Bytes;
use chrono::Duration;
use std::sync::Arc;
use tidemark_storage::blob::{BlobPath, BlobStore, Etag, UploadOptions};
use tidemark_storage::error::StorageError;
use tracing::{debug, instrument};

/// Coordinates projection status transitions and rebuild tokens.
///
/// Lifecycle: `Active -> Rebuilding -> ReadyForSwap -> Active`; any state
/// may transition to `Disabled`, and a cancellation returns any state to
/// `Active`. Every transition is persisted to `<Name>.status.json` under
/// an ETag guard so concurrent coordinators cannot interleave.
pub struct ProjectionCoordinator {
    store: Arc<dyn BlobStore>,
    container: String,
}

impl ProjectionCoordinator {
    /// Create a coordinator persisting status documents into `container`.
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    fn status_path(&self, name: &str) -> BlobPath {
        BlobPath::new(self.container.clone(), format!("{name}.status.json"))
    }

    async fn load(&self, name: &str) -> Result<(StatusDocument, Option<Etag>)> {
        let path = self.status_path(name);
        match self.store.get_properties(&path).await {
            Ok(props) => {
                let bytes = self.store.download(&path, Some(&props.etag)).await?;
                let doc: StatusDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    ProjectionError::processing(format!("status of {name} unreadable: {e}"))
                })?;
                Ok((doc, Some(props.etag)))
            }
            Err(err) if err.is_not_found() => Ok((StatusDocument::default(), None)),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, name: &str, doc: &StatusDocument, etag: Option<Etag>) -> Result<()> {
        self.store
            .create_container_if_absent(&self.container)
            .await?;

        let options = match etag {
            Some(etag) => UploadOptions::json().if_match(etag),
            None => UploadOptions::json().if_none_match_any(),
        };

        let path = self.status_path(name);
        match self
            .store
            .upload(&path, Bytes::from(serde_json::to_vec(doc)?), options)
            .await
        {
            Ok(_) => Ok(()),
            Err(StorageError::PreconditionFailed(p)) | Err(StorageError::AlreadyExists(p)) => {
                Err(ProjectionError::ConcurrencyConflict(p))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Check a presented token against the rebuild in progress.
    fn validate_token(stored: Option<&RebuildToken>, presented: &RebuildToken) -> Result<()> {
        let stored = stored
            .ok_or_else(|| ProjectionError::invalid_token("no rebuild is in progress"))?;

        if stored.token_id != presented.token_id {
            return Err(ProjectionError::invalid_token(format!(
                "token {} does not match the rebuild in progress",
                presented.token_id
            )));
        }
        if presented.is_expired() || stored.is_expired() {
            return Err(ProjectionError::invalid_token(format!(
                "token {} expired at {}",
                stored.token_id, stored.expires_at
            )));
        }
        Ok(())
    }

    /// Current status of a projection. Projections without a status
    /// document are `Active`.
    pub async fn status(&self, name: &str) -> Result<StatusDocument> {
        Ok(self.load(name).await?.0)
    }

    /// Begin a rebuild: `Active -> Rebuilding`, issuing a token that
    /// expires after `ttl`.
    #[instrument(skip(self), fields(projection = name))]
    pub async fn start_rebuild(
        &self,
        name: &str,
        object_id: &str,
        strategy: RebuildStrategy,
        ttl: Duration,
    ) -> Result<RebuildToken> {
        let (mut doc, etag) = self.load(name).await?;
        if doc.status != ProjectionStatus::Active {
            return Err(ProjectionError::InvalidTransition {
                from: doc.status,
                to: ProjectionStatus::Rebuilding,
            });
        }

        let token = RebuildToken::issue(name, object_id, strategy, ttl);
        doc.status = ProjectionStatus::Rebuilding;
        doc.token = Some(token.clone());
        self.save(name, &doc, etag).await?;

        debug!(token = %token.token_id, ?strategy, "rebuild started");
        Ok(token)
    }

    /// Move the rebuild into its catch-up phase.
    pub async fn start_catch_up(&self, name: &str, token: &RebuildToken) -> Result<RebuildToken> {
        let (mut doc, etag) = self.load(name).await?;
        if doc.status != ProjectionStatus::Rebuilding {
            return Err(ProjectionError::InvalidTransition {
                from: doc.status,
                to: ProjectionStatus::Rebuilding,
            });
        }
        Self::validate_token(doc.token.as_ref(), token)?;

        let updated = RebuildToken {
            phase: RebuildPhase::CatchingUp,
            ..doc.token.take().expect("token validated above")
        };
        doc.token = Some(updated.clone());
        self.save(name, &doc, etag).await?;
        Ok(updated)
    }

    /// Mark a caught-up rebuild as ready: `Rebuilding -> ReadyForSwap`.
    pub async fn mark_ready(&self, name: &str, token: &RebuildToken) -> Result<()> {
        let (mut doc, etag) = self.load(name).await?;
        let in_catch_up = doc.status == ProjectionStatus::Rebuilding
            && doc
                .token
                .as_ref()
                .is_some_and(|t| t.phase == RebuildPhase::CatchingUp);
        if !in_catch_up {
            return Err(ProjectionError::InvalidTransition {
                from: doc.status,
                to: ProjectionStatus::ReadyForSwap,
            });
        }
        Self::validate_token(doc.token.as_ref(), token)?;

        doc.status = ProjectionStatus::ReadyForSwap;
        if let Some(stored) = doc.token.as_mut() {
            stored.phase = RebuildPhase::Ready;
        }
        self.save(name, &doc, etag).await
    }

    /// Complete the rebuild: `ReadyForSwap -> Active`. The caller swaps
    /// the rebuilt body and checkpoint while holding `ReadyForSwap`.
    pub async fn complete_rebuild(&self, name: &str, token: &RebuildToken) -> Result<()> {
        let (mut doc, etag) = self.load(name).await?;
        if doc.status != ProjectionStatus::ReadyForSwap {
            return Err(ProjectionError::InvalidTransition {
                from: doc.status,
                to: ProjectionStatus::Active,
            });
        }
        Self::validate_token(doc.token.as_ref(), token)?;

        doc.status = ProjectionStatus::Active;
        doc.token = None;
        self.save(name, &doc, etag).await?;

        debug!(projection = name, "rebuild completed");
        Ok(())
    }

    /// Abandon the rebuild from any state, returning to `Active`.
    pub async fn cancel_rebuild(&self, name: &str, token: &RebuildToken) -> Result<()> {
        let (mut doc, etag) = self.load(name).await?;
        Self::validate_token(doc.token.as_ref(), token)?;

        doc.status = ProjectionStatus::Active;
        doc.token = None;
        self.save(name, &doc, etag).await?;

        debug!(projection = name, "rebuild cancelled");
        Ok(())
    }

    /// Force the projection to `Disabled` or back to `Active`. Other
    /// states are only reachable through the rebuild lifecycle.
    pub async fn set_status(&self, name: &str, status: ProjectionStatus) -> Result<()> {
        if !matches!(
            status,
            ProjectionStatus::Disabled | ProjectionStatus::Active
        ) {
            let from = self.status(name).await?.status;
            return Err(ProjectionError::InvalidTransition { from, to: status });
        }

        let (mut doc, etag) = self.load(name).await?;
        doc.status = status;
        if status == ProjectionStatus::Active {
            doc.token = None;
        }
        self.save(name, &doc, etag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tidemark_storage::memory::InMemoryBlobStore;

    fn coordinator() -> ProjectionCoordinator {
        ProjectionCoordinator::new(Arc::new(InMemoryBlobStore::new()), "projections")
    }

    #[tokio::test]
    async fn test_full_rebuild_lifecycle() {
        let coordinator = coordinator();

        let token = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(
            coordinator.status("totals").await.unwrap().status,
            ProjectionStatus::Rebuilding
        );

        let token = coordinator.start_catch_up("totals", &token).await.unwrap();
        assert_eq!(token.phase, RebuildPhase::CatchingUp);

        coordinator.mark_ready("totals", &token).await.unwrap();
        assert_eq!(
            coordinator.status("totals").await.unwrap().status,
            ProjectionStatus::ReadyForSwap
        );

        coordinator.complete_rebuild("totals", &token).await.unwrap();
        let status = coordinator.status("totals").await.unwrap();
        assert_eq!(status.status, ProjectionStatus::Active);
        assert!(status.token.is_none());
    }

    #[tokio::test]
    async fn test_unknown_projection_is_active() {
        let coordinator = coordinator();
        let status = coordinator.status("never-seen").await.unwrap();
        assert_eq!(status.status, ProjectionStatus::Active);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let coordinator = coordinator();

        coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap();
        let err = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_foreign_token_rejected() {
        let coordinator = coordinator();

        let _token = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap();

        let foreign = RebuildToken::issue("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30));
        let err = coordinator
            .start_catch_up("totals", &foreign)
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let coordinator = coordinator();

        let token = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap();

        let expired = RebuildToken {
            expires_at: Utc::now() - Duration::seconds(1),
            ..token
        };
        let err = coordinator
            .start_catch_up("totals", &expired)
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_cancel_returns_to_active() {
        let coordinator = coordinator();

        let token = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlockingWithCatchUp, Duration::minutes(30))
            .await
            .unwrap();
        coordinator.cancel_rebuild("totals", &token).await.unwrap();

        let status = coordinator.status("totals").await.unwrap();
        assert_eq!(status.status, ProjectionStatus::Active);
        assert!(status.token.is_none());

        // A fresh rebuild can start after cancellation.
        coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disable_and_reenable() {
        let coordinator = coordinator();

        coordinator
            .set_status("totals", ProjectionStatus::Disabled)
            .await
            .unwrap();
        assert_eq!(
            coordinator.status("totals").await.unwrap().status,
            ProjectionStatus::Disabled
        );

        // Rebuilds cannot start while disabled.
        let err = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidTransition { .. }));

        coordinator
            .set_status("totals", ProjectionStatus::Active)
            .await
            .unwrap();
        assert_eq!(
            coordinator.status("totals").await.unwrap().status,
            ProjectionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_set_status_rejects_lifecycle_states() {
        let coordinator = coordinator();
        let err = coordinator
            .set_status("totals", ProjectionStatus::ReadyForSwap)
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_mark_ready_requires_catch_up() {
        let coordinator = coordinator();

        let token = coordinator
            .start_rebuild("totals", "*", RebuildStrategy::BlueGreen, Duration::minutes(30))
            .await
            .unwrap();

        // Still in the initial Rebuilding phase.
        let err = coordinator.mark_ready("totals", &token).await.unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidTransition { .. }));
    }
}
