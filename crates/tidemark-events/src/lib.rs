//! # Tidemark Events
//!
//! Event sourcing storage core for Tidemark: append-only event streams for
//! business objects persisted on a general-purpose blob object store.
//!
//! ## Features
//!
//! - **Object Documents**: Authoritative per-object metadata with an
//!   active stream, terminated streams, and a revision hash chain
//! - **Event Data Store**: ETag-guarded appends, chunk rolling, and
//!   version-range reads over stream blobs
//! - **Hash Chain**: Canonical-JSON SHA-256 linkage between a document and
//!   its stream head, detecting split-brain writes
//! - **Active-Configuration Migration**: Atomic rewrite of the active
//!   stream configuration that keeps subsequent appends conflict-free
//! - **Tag Indices**: Bidirectional tag-to-object and tag-to-stream
//!   indices with idempotent, race-safe updates
//! - **Snapshots**: Versioned materialized state with snapshot strategies
//! - **Object-Id Provider**: Pageable enumeration by blob prefix
//! - **Store Registry**: Route operations by configured store type keys
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tidemark_events::prelude::*;
//! use std::sync::Arc;
//! use tidemark_storage::memory::InMemoryBlobStore;
//!
//! # async fn example() -> tidemark_events::error::Result<()> {
//! let blobs = Arc::new(InMemoryBlobStore::new());
//! let options = EventStoreOptions::default();
//!
//! let documents = BlobObjectDocumentStore::new(blobs.clone(), options.clone());
//! let data = BlobEventDataStore::new(blobs, options);
//!
//! let mut doc = documents.get_or_create("order", "o-1").await?;
//! documents.set(&mut doc).await?;
//!
//! let tokens = data
//!     .append(&mut doc, vec![PendingEvent::new("Created", "{}")])
//!     .await?;
//! assert_eq!(tokens[0].version, 0);
//!
//! let events = data.read(&doc, None, None, None).await?;
//! # let _ = events;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Core modules
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod hash;

// Stores
pub mod data_store;
pub mod document_store;
pub mod object_ids;
pub mod registry;
pub mod snapshot;
pub mod tags;

/// Prelude module for convenient imports.
pub mod prelude {
    //! Commonly used types and traits.

    // Error types
    pub use crate::error::{EventError, Result};

    // Data model
    pub use crate::document::{
        ChunkSettings, ObjectDocument, SnapshotReference, StreamChunk, StreamDocument,
        StreamInformation,
    };
    pub use crate::event::{EventRecord, PendingEvent, VersionToken};

    // Hash chain
    pub use crate::hash::{chain_matches, document_hash, fingerprint, UNBOUND_HASH};

    // Stores
    pub use crate::data_store::{BlobEventDataStore, EventDataStore};
    pub use crate::document_store::{BlobObjectDocumentStore, ObjectDocumentStore};
    pub use crate::object_ids::{ObjectIdPage, ObjectIdProvider};
    pub use crate::snapshot::{
        AlwaysStrategy, BlobSnapshotStore, FrequencyStrategy, NeverStrategy, SnapshotStore,
        SnapshotStrategy,
    };
    pub use crate::tags::{sanitize_tag, BlobTagStore, TagDocument, TagKind, TagStore};

    // Configuration and routing
    pub use crate::config::{EventStoreOptions, DEFAULT_STORE_TYPE};
    pub use crate::registry::StoreRegistry;
}

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use chrono;
pub use serde;
pub use tidemark_storage;
