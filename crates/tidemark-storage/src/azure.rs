//! Azure Blob Storage backend implementation.

use crate::blob::{
    BlobItem, BlobPage, BlobPath, BlobProperties, BlobStore, Etag, LeaseId, LeaseState,
    UploadOptions, WriteConditions,
};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_core::request_options::IfMatchCondition;
use azure_core::StatusCode;
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::*;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Azure Blob Storage backend.
pub struct AzureBlobStore {
    service: BlobServiceClient,
}

impl AzureBlobStore {
    /// Create a backend from an account name and access key.
    pub fn from_access_key(account: impl Into<String>, access_key: impl Into<String>) -> Self {
        let account = account.into();
        let credentials = StorageCredentials::access_key(account.clone(), access_key.into());
        Self {
            service: BlobServiceClient::new(account, credentials),
        }
    }

    /// Create a backend from an existing service client.
    pub fn from_service_client(service: BlobServiceClient) -> Self {
        Self { service }
    }

    fn blob_client(&self, path: &BlobPath) -> BlobClient {
        self.service
            .container_client(&path.container)
            .blob_client(&path.blob)
    }

    /// Translate an Azure error into the storage taxonomy.
    ///
    /// The HTTP status alone is not enough: a 404 may be the blob or its
    /// container, and a 409 may be an existing blob or a held lease. The
    /// service error code disambiguates.
    fn map_error(context: &str, err: azure_core::Error) -> StorageError {
        if let ErrorKind::HttpResponse { status, error_code } = err.kind() {
            let code = error_code.as_deref().unwrap_or("");
            return match (*status, code) {
                (StatusCode::NotFound, "ContainerNotFound") => {
                    StorageError::ContainerNotFound(context.to_string())
                }
                (StatusCode::NotFound, _) => StorageError::BlobNotFound(context.to_string()),
                (StatusCode::PreconditionFailed, _) => {
                    StorageError::PreconditionFailed(context.to_string())
                }
                (StatusCode::Conflict, "LeaseAlreadyPresent") => {
                    StorageError::LeaseHeld(context.to_string())
                }
                (StatusCode::Conflict, "LeaseIdMismatchWithLeaseOperation") => {
                    StorageError::LeaseLost(context.to_string())
                }
                (StatusCode::Conflict, _) => StorageError::AlreadyExists(context.to_string()),
                _ => StorageError::Backend(err.to_string()),
            };
        }
        StorageError::Backend(err.to_string())
    }

    fn parse_lease_id(context: &str, lease: &LeaseId) -> StorageResult<azure_core::request_options::LeaseId> {
        lease
            .as_str()
            .parse()
            .map_err(|_| StorageError::LeaseLost(context.to_string()))
    }

    fn convert_lease_state(state: azure_core::LeaseState) -> LeaseState {
        use azure_core::LeaseState as Azure;
        match state {
            Azure::Available => LeaseState::Available,
            Azure::Leased => LeaseState::Leased,
            Azure::Expired => LeaseState::Expired,
            Azure::Breaking => LeaseState::Breaking,
            Azure::Broken => LeaseState::Broken,
        }
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn get_properties(&self, path: &BlobPath) -> StorageResult<BlobProperties> {
        let context = path.to_string();
        let response = self
            .blob_client(path)
            .get_properties()
            .await
            .map_err(|e| Self::map_error(&context, e))?;

        // Convert Azure's OffsetDateTime to chrono's DateTime<Utc>
        let last_modified = {
            let offset_dt = response.blob.properties.last_modified;
            let unix_timestamp = offset_dt.unix_timestamp();
            let nanos = offset_dt.nanosecond();
            chrono::DateTime::<chrono::Utc>::from_timestamp(unix_timestamp, nanos)
                .unwrap_or_else(chrono::Utc::now)
        };

        Ok(BlobProperties {
            etag: Etag::new(response.blob.properties.etag.to_string()),
            lease_state: Self::convert_lease_state(
                response
                    .blob
                    .properties
                    .lease_state
                    .unwrap_or(azure_core::LeaseState::Available),
            ),
            content_length: response.blob.properties.content_length,
            last_modified,
        })
    }

    async fn download(&self, path: &BlobPath, if_match: Option<&Etag>) -> StorageResult<Bytes> {
        let context = path.to_string();
        let mut builder = self.blob_client(path).get();
        if let Some(etag) = if_match {
            builder =
                builder.if_match(IfMatchCondition::Match(etag.as_str().to_string()));
        }

        let mut data = BytesMut::new();
        let mut stream = builder.into_stream();
        while let Some(chunk) = stream.next().await {
            let response = chunk.map_err(|e| Self::map_error(&context, e))?;
            let bytes = response
                .data
                .collect()
                .await
                .map_err(|e| Self::map_error(&context, e))?;
            data.extend_from_slice(&bytes);
        }

        Ok(data.freeze())
    }

    async fn upload(
        &self,
        path: &BlobPath,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<Etag> {
        let context = path.to_string();
        let mut request = self
            .blob_client(path)
            .put_block_blob(data)
            .content_type(options.content_type.clone());

        match &options.conditions {
            WriteConditions::IfMatch(etag) => {
                request =
                    request.if_match(IfMatchCondition::Match(etag.as_str().to_string()));
            }
            WriteConditions::IfNoneMatchAny => {
                request = request.if_match(IfMatchCondition::NotMatch("*".to_string()));
            }
            WriteConditions::Unconditional => {}
        }

        // Custom metadata and index tags require header plumbing in
        // azure_storage_blobs 0.17; set_blob_metadata covers the rare
        // callers that need them after the fact.
        let _ = (&options.metadata, &options.tags);

        let response = request.await.map_err(|e| Self::map_error(&context, e))?;
        Ok(Etag::new(response.etag.to_string()))
    }

    async fn delete(&self, path: &BlobPath, if_match: Option<&Etag>) -> StorageResult<()> {
        let context = path.to_string();
        let mut request = self.blob_client(path).delete();
        if let Some(etag) = if_match {
            request =
                request.if_match(IfMatchCondition::Match(etag.as_str().to_string()));
        }

        request.await.map_err(|e| Self::map_error(&context, e))?;
        Ok(())
    }

    async fn exists(&self, path: &BlobPath) -> StorageResult<bool> {
        let context = path.to_string();
        match self.blob_client(path).exists().await {
            Ok(exists) => Ok(exists),
            Err(e) => match Self::map_error(&context, e) {
                err if err.is_not_found() => Ok(false),
                err => Err(err),
            },
        }
    }

    async fn create_container_if_absent(&self, container: &str) -> StorageResult<()> {
        match self.service.container_client(container).create().await {
            Ok(_) => Ok(()),
            Err(e) => match Self::map_error(container, e) {
                StorageError::AlreadyExists(_) => Ok(()),
                err => Err(StorageError::ContainerAutoCreateFailed {
                    container: container.to_string(),
                    reason: err.to_string(),
                }),
            },
        }
    }

    async fn list_prefix(
        &self,
        container: &str,
        prefix: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> StorageResult<BlobPage> {
        let max_results = NonZeroU32::new(page_size.clamp(1, 5000) as u32)
            .unwrap_or_else(|| NonZeroU32::new(5000).unwrap());

        let mut builder = self
            .service
            .container_client(container)
            .list_blobs()
            .prefix(prefix.to_string())
            .max_results(max_results);
        if let Some(marker) = continuation {
            builder = builder.marker(marker.to_string());
        }

        let response = builder
            .into_stream()
            .next()
            .await
            .transpose()
            .map_err(|e| Self::map_error(container, e))?;

        let Some(response) = response else {
            return Ok(BlobPage::default());
        };

        let items = response
            .blobs
            .blobs()
            .map(|blob| BlobItem {
                name: blob.name.clone(),
                etag: Some(Etag::new(blob.properties.etag.to_string())),
                content_length: blob.properties.content_length,
            })
            .collect();

        Ok(BlobPage {
            items,
            next: response.next_marker.map(|m| m.as_str().to_string()),
        })
    }

    async fn acquire_lease(&self, path: &BlobPath, ttl: Duration) -> StorageResult<LeaseId> {
        let context = path.to_string();
        let response = self
            .blob_client(path)
            .acquire_lease(ttl)
            .await
            .map_err(|e| Self::map_error(&context, e))?;

        Ok(LeaseId::new(response.lease_id.to_string()))
    }

    async fn renew_lease(&self, path: &BlobPath, lease: &LeaseId) -> StorageResult<()> {
        let context = path.to_string();
        let lease_id = Self::parse_lease_id(&context, lease)?;
        self.blob_client(path)
            .blob_lease_client(lease_id)
            .renew()
            .await
            .map_err(|e| Self::map_error(&context, e))?;
        Ok(())
    }

    async fn release_lease(&self, path: &BlobPath, lease: &LeaseId) -> StorageResult<()> {
        let context = path.to_string();
        let lease_id = Self::parse_lease_id(&context, lease)?;
        self.blob_client(path)
            .blob_lease_client(lease_id)
            .release()
            .await
            .map_err(|e| Self::map_error(&context, e))?;
        Ok(())
    }

    async fn break_lease(&self, path: &BlobPath) -> StorageResult<()> {
        let context = path.to_string();
        self.blob_client(path)
            .break_lease()
            .await
            .map_err(|e| Self::map_error(&context, e))?;
        Ok(())
    }
}

/// Thread-safe cache of blob service clients keyed by connection name.
///
/// Stores routed through per-stream connection names share one client per
/// account instead of rebuilding credentials on every call.
#[derive(Default)]
pub struct ClientCache {
    clients: DashMap<String, BlobServiceClient>,
}

impl ClientCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the client for a connection name, constructing it on first use.
    pub fn get_or_create<F>(&self, connection_name: &str, build: F) -> BlobServiceClient
    where
        F: FnOnce() -> BlobServiceClient,
    {
        self.clients
            .entry(connection_name.to_string())
            .or_insert_with(build)
            .clone()
    }

    /// Number of cached clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
