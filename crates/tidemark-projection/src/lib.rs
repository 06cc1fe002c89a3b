//! # Tidemark Projection
//!
//! Projection coordination for the Tidemark event sourcing engine:
//! materialized read models over one or more event streams, persisted with
//! fingerprint-addressed external checkpoints and coordinated rebuilds.
//!
//! ## Features
//!
//! - **Status Lifecycle**: `Active -> Rebuilding -> ReadyForSwap -> Active`
//!   with `Disabled` and cancellation edges, persisted per projection
//! - **Rebuild Tokens**: Time-limited capabilities authorizing each
//!   rebuild phase
//! - **External Checkpoints**: Checkpoints stored by canonical-JSON
//!   SHA-256 fingerprint, so identical checkpoints share one blob
//! - **Factory Loading**: Instances only come from `get_or_create`, which
//!   reloads the accumulated checkpoint
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tidemark_projection::prelude::*;
//! use std::sync::Arc;
//! use tidemark_events::event::VersionToken;
//! use tidemark_storage::memory::InMemoryBlobStore;
//!
//! # async fn example() -> tidemark_projection::error::Result<()> {
//! let blobs = Arc::new(InMemoryBlobStore::new());
//! let projections = ProjectionStore::new(blobs, "projections");
//!
//! let mut totals = projections.get_or_create("company-totals").await?;
//! totals.update_checkpoint(&VersionToken::new("company", "company-1", "company-1", 0));
//! projections.save(&mut totals).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod projection;
pub mod status;

/// Prelude module for convenient imports.
pub mod prelude {
    //! Commonly used types and traits.

    pub use crate::checkpoint::Checkpoint;
    pub use crate::coordinator::ProjectionCoordinator;
    pub use crate::error::{ProjectionError, Result};
    pub use crate::projection::{ProjectionInstance, ProjectionStore};
    pub use crate::status::{
        ProjectionStatus, RebuildPhase, RebuildStrategy, RebuildToken, StatusDocument,
    };
}

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use chrono;
pub use tidemark_events;
pub use tidemark_storage;
