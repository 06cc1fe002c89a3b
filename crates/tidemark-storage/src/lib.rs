//! # Tidemark Storage
//!
//! Blob storage capability set and lease-based locking for the Tidemark
//! event sourcing engine.
//!
//! ## Features
//!
//! - **Blob Capability Set**: Conditional upload/download, properties,
//!   delete, prefix listing, and lease operations behind one trait
//! - **Conditional Semantics**: Azure-Blob-like ETag behavior (412 on
//!   mismatch, 409 on `if-none-match: *` collision, 409 while leased)
//! - **In-Memory Backend**: Full-fidelity backend for tests and local runs
//! - **Azure Backend**: Production backend over `azure_storage_blobs`
//! - **Distributed Lock**: Blob-lease lock with jittered acquisition and
//!   automatic renewal
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tidemark_storage::prelude::*;
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # async fn example() -> StorageResult<()> {
//! let store = InMemoryBlobStore::new();
//! store.create_container_if_absent("orders").await?;
//!
//! let path = BlobPath::new("orders", "o-1.json");
//! let etag = store
//!     .upload(&path, Bytes::from("{}"), UploadOptions::json().if_none_match_any())
//!     .await?;
//!
//! let bytes = store.download(&path, Some(&etag)).await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod blob;
pub mod error;
pub mod lock;
pub mod memory;

#[cfg(feature = "azure-backend")]
pub mod azure;

/// Prelude module for convenient imports.
pub mod prelude {
    //! Commonly used types and traits.

    pub use crate::blob::{
        container_name_for, BlobItem, BlobPage, BlobPath, BlobProperties, BlobStore, Etag,
        LeaseId, LeaseState, UploadOptions, WriteConditions,
    };
    pub use crate::error::{StorageError, StorageResult};
    pub use crate::lock::{sanitize_lock_key, LockHandle, LockManager, LOCK_PROVIDER_NAME};
    pub use crate::memory::InMemoryBlobStore;

    #[cfg(feature = "azure-backend")]
    pub use crate::azure::{AzureBlobStore, ClientCache};
}

pub use async_trait::async_trait;
pub use bytes;
