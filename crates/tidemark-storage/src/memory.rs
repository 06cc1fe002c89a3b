//! In-memory blob store for tests and local development.

use crate::blob::{
    BlobItem, BlobPage, BlobPath, BlobProperties, BlobStore, Etag, LeaseId, LeaseState,
    UploadOptions, WriteConditions,
};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Lease {
    id: LeaseId,
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    etag: Etag,
    metadata: HashMap<String, String>,
    tags: HashMap<String, String>,
    last_modified: DateTime<Utc>,
    lease: Option<Lease>,
}

impl StoredBlob {
    fn active_lease(&self) -> Option<&Lease> {
        self.lease
            .as_ref()
            .filter(|l| l.expires_at > Instant::now())
    }

    fn lease_state(&self) -> LeaseState {
        match &self.lease {
            Some(l) if l.expires_at > Instant::now() => LeaseState::Leased,
            Some(_) => LeaseState::Expired,
            None => LeaseState::Available,
        }
    }
}

type Container = HashMap<String, StoredBlob>;

/// In-memory [`BlobStore`] implementation with full conditional-write and
/// lease semantics.
///
/// Every unit test in the workspace drives this backend; it mirrors the
/// Azure conditional behavior (412 on ETag mismatch, 409 on
/// `if-none-match: *` collision, 409 while a lease is held) so the stores
/// built on top can be exercised without network access.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    containers: Arc<RwLock<HashMap<String, Container>>>,
}

impl InMemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given containers pre-created.
    pub fn with_containers(names: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut containers = store.containers.write();
            for name in names {
                containers.insert((*name).to_string(), Container::new());
            }
        }
        store
    }

    /// Number of blobs currently stored in a container.
    pub fn blob_count(&self, container: &str) -> usize {
        self.containers
            .read()
            .get(container)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn fresh_etag() -> Etag {
        Etag::new(format!("\"{}\"", Uuid::new_v4()))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get_properties(&self, path: &BlobPath) -> StorageResult<BlobProperties> {
        let containers = self.containers.read();
        let container = containers
            .get(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        Ok(BlobProperties {
            etag: blob.etag.clone(),
            lease_state: blob.lease_state(),
            content_length: blob.data.len() as u64,
            last_modified: blob.last_modified,
        })
    }

    async fn download(&self, path: &BlobPath, if_match: Option<&Etag>) -> StorageResult<Bytes> {
        let containers = self.containers.read();
        let container = containers
            .get(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        if let Some(expected) = if_match {
            if &blob.etag != expected {
                return Err(StorageError::PreconditionFailed(path.to_string()));
            }
        }

        Ok(blob.data.clone())
    }

    async fn upload(
        &self,
        path: &BlobPath,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<Etag> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;

        let existing = container.get(&path.blob);
        match &options.conditions {
            WriteConditions::IfMatch(expected) => match existing {
                None => return Err(StorageError::BlobNotFound(path.to_string())),
                Some(blob) if &blob.etag != expected => {
                    return Err(StorageError::PreconditionFailed(path.to_string()))
                }
                Some(_) => {}
            },
            WriteConditions::IfNoneMatchAny => {
                if existing.is_some() {
                    return Err(StorageError::AlreadyExists(path.to_string()));
                }
            }
            WriteConditions::Unconditional => {}
        }

        if let Some(blob) = existing {
            if blob.active_lease().is_some() {
                return Err(StorageError::LeaseHeld(path.to_string()));
            }
        }

        let etag = Self::fresh_etag();
        container.insert(
            path.blob.clone(),
            StoredBlob {
                data,
                etag: etag.clone(),
                metadata: options.metadata,
                tags: options.tags,
                last_modified: Utc::now(),
                lease: None,
            },
        );

        Ok(etag)
    }

    async fn delete(&self, path: &BlobPath, if_match: Option<&Etag>) -> StorageResult<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        if let Some(expected) = if_match {
            if &blob.etag != expected {
                return Err(StorageError::PreconditionFailed(path.to_string()));
            }
        }
        if blob.active_lease().is_some() {
            return Err(StorageError::LeaseHeld(path.to_string()));
        }

        container.remove(&path.blob);
        Ok(())
    }

    async fn exists(&self, path: &BlobPath) -> StorageResult<bool> {
        let containers = self.containers.read();
        Ok(containers
            .get(&path.container)
            .map(|c| c.contains_key(&path.blob))
            .unwrap_or(false))
    }

    async fn create_container_if_absent(&self, container: &str) -> StorageResult<()> {
        self.containers
            .write()
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn list_prefix(
        &self,
        container: &str,
        prefix: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> StorageResult<BlobPage> {
        let containers = self.containers.read();
        let container = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;

        let mut names: Vec<&String> = container
            .keys()
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();

        let start = match continuation {
            // The continuation token is the last name of the previous page.
            Some(marker) => names.partition_point(|name| name.as_str() <= marker),
            None => 0,
        };

        let page: Vec<BlobItem> = names
            .iter()
            .skip(start)
            .take(page_size)
            .map(|name| {
                let blob = &container[name.as_str()];
                BlobItem {
                    name: (*name).clone(),
                    etag: Some(blob.etag.clone()),
                    content_length: blob.data.len() as u64,
                }
            })
            .collect();

        let next = if start + page.len() < names.len() {
            page.last().map(|item| item.name.clone())
        } else {
            None
        };

        Ok(BlobPage { items: page, next })
    }

    async fn acquire_lease(&self, path: &BlobPath, ttl: Duration) -> StorageResult<LeaseId> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get_mut(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        if blob.active_lease().is_some() {
            return Err(StorageError::LeaseHeld(path.to_string()));
        }

        let lease = Lease {
            id: LeaseId::new(Uuid::new_v4().to_string()),
            ttl,
            expires_at: Instant::now() + ttl,
        };
        let id = lease.id.clone();
        blob.lease = Some(lease);
        Ok(id)
    }

    async fn renew_lease(&self, path: &BlobPath, lease: &LeaseId) -> StorageResult<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get_mut(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        match &mut blob.lease {
            Some(held) if &held.id == lease => {
                held.expires_at = Instant::now() + held.ttl;
                Ok(())
            }
            _ => Err(StorageError::LeaseLost(path.to_string())),
        }
    }

    async fn release_lease(&self, path: &BlobPath, lease: &LeaseId) -> StorageResult<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get_mut(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        match &blob.lease {
            Some(held) if &held.id == lease => {
                blob.lease = None;
                Ok(())
            }
            _ => Err(StorageError::LeaseLost(path.to_string())),
        }
    }

    async fn break_lease(&self, path: &BlobPath) -> StorageResult<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&path.container)
            .ok_or_else(|| StorageError::ContainerNotFound(path.container.clone()))?;
        let blob = container
            .get_mut(&path.blob)
            .ok_or_else(|| StorageError::BlobNotFound(path.to_string()))?;

        blob.lease = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(blob: &str) -> BlobPath {
        BlobPath::new("test", blob)
    }

    async fn store() -> InMemoryBlobStore {
        InMemoryBlobStore::with_containers(&["test"])
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let store = store().await;
        let etag = store
            .upload(&path("a.json"), Bytes::from("{}"), UploadOptions::json())
            .await
            .unwrap();

        let data = store.download(&path("a.json"), Some(&etag)).await.unwrap();
        assert_eq!(data, Bytes::from("{}"));
    }

    #[tokio::test]
    async fn test_if_none_match_collision() {
        let store = store().await;
        store
            .upload(
                &path("a.json"),
                Bytes::from("1"),
                UploadOptions::json().if_none_match_any(),
            )
            .await
            .unwrap();

        let err = store
            .upload(
                &path("a.json"),
                Bytes::from("2"),
                UploadOptions::json().if_none_match_any(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_if_match_conflict() {
        let store = store().await;
        let etag = store
            .upload(&path("a.json"), Bytes::from("1"), UploadOptions::json())
            .await
            .unwrap();

        // A concurrent writer replaces the blob.
        store
            .upload(&path("a.json"), Bytes::from("2"), UploadOptions::json())
            .await
            .unwrap();

        let err = store
            .upload(
                &path("a.json"),
                Bytes::from("3"),
                UploadOptions::json().if_match(etag),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_container() {
        let store = InMemoryBlobStore::new();
        let err = store
            .upload(&path("a.json"), Bytes::from("1"), UploadOptions::json())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ContainerNotFound(_)));

        assert!(!store.exists(&path("a.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_guarded_by_etag() {
        let store = store().await;
        store
            .upload(&path("a.json"), Bytes::from("1"), UploadOptions::json())
            .await
            .unwrap();
        let err = store
            .delete(&path("a.json"), Some(&Etag::new("\"stale\"")))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed(_)));

        let props = store.get_properties(&path("a.json")).await.unwrap();
        store
            .delete(&path("a.json"), Some(&props.etag))
            .await
            .unwrap();
        assert!(!store.exists(&path("a.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_lifecycle() {
        let store = store().await;
        store
            .upload(&path("a.lock"), Bytes::new(), UploadOptions::default())
            .await
            .unwrap();

        let lease = store
            .acquire_lease(&path("a.lock"), Duration::from_secs(30))
            .await
            .unwrap();

        let err = store
            .acquire_lease(&path("a.lock"), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LeaseHeld(_)));

        // Writes against a leased blob are rejected.
        let err = store
            .upload(&path("a.lock"), Bytes::from("x"), UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LeaseHeld(_)));

        store.renew_lease(&path("a.lock"), &lease).await.unwrap();
        store.release_lease(&path("a.lock"), &lease).await.unwrap();

        let props = store.get_properties(&path("a.lock")).await.unwrap();
        assert_eq!(props.lease_state, LeaseState::Available);
    }

    #[tokio::test]
    async fn test_lease_expiry() {
        let store = store().await;
        store
            .upload(&path("a.lock"), Bytes::new(), UploadOptions::default())
            .await
            .unwrap();

        store
            .acquire_lease(&path("a.lock"), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The expired lease no longer blocks a new holder.
        store
            .acquire_lease(&path("a.lock"), Duration::from_secs(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_prefix_pagination() {
        let store = store().await;
        for i in 0..5 {
            store
                .upload(
                    &path(&format!("order/{i}.json")),
                    Bytes::from("{}"),
                    UploadOptions::json(),
                )
                .await
                .unwrap();
        }
        store
            .upload(&path("other/x.json"), Bytes::from("{}"), UploadOptions::json())
            .await
            .unwrap();

        let first = store
            .list_prefix("test", "order/", None, 3)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);
        let marker = first.next.clone().expect("expected a continuation token");

        let second = store
            .list_prefix("test", "order/", Some(&marker), 3)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(second.next.is_none());

        let mut names: Vec<String> = first
            .items
            .into_iter()
            .chain(second.items)
            .map(|i| i.name)
            .collect();
        names.dedup();
        assert_eq!(names.len(), 5);
    }
}
