//! Projection status lifecycle and rebuild tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionStatus {
    /// Serving reads and folding new events
    Active,
    /// A rebuild is in progress
    Rebuilding,
    /// The rebuilt state is complete and awaiting the swap
    ReadyForSwap,
    /// Taken out of service
    Disabled,
}

/// Strategy governing how a rebuild runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildStrategy {
    /// Block writers, rebuild, then catch up on the backlog
    BlockingWithCatchUp,
    /// Rebuild side-by-side and swap when ready
    BlueGreen,
}

/// Phase a rebuild token is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildPhase {
    /// Initial full rebuild
    Rebuilding,
    /// Folding events that arrived during the rebuild
    CatchingUp,
    /// Caught up; eligible for the swap
    Ready,
    /// Swap performed
    Completed,
    /// Rebuild abandoned
    Cancelled,
}

/// Time-limited capability authorizing the phases of one rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildToken {
    /// Projection being rebuilt
    pub projection_name: String,
    /// Object scope of the rebuild
    pub object_id: String,
    /// Rebuild strategy
    pub strategy: RebuildStrategy,
    /// When the token was issued
    pub issued_at: DateTime<Utc>,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
    /// Current phase
    pub phase: RebuildPhase,
    /// Unique token identity
    pub token_id: Uuid,
}

impl RebuildToken {
    /// Issue a fresh token valid for `ttl`.
    pub fn issue(
        projection_name: impl Into<String>,
        object_id: impl Into<String>,
        strategy: RebuildStrategy,
        ttl: Duration,
    ) -> Self {
        let issued_at = Utc::now();
        Self {
            projection_name: projection_name.into(),
            object_id: object_id.into(),
            strategy,
            issued_at,
            expires_at: issued_at + ttl,
            phase: RebuildPhase::Rebuilding,
            token_id: Uuid::new_v4(),
        }
    }

    /// Whether the token has passed its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Persisted status of one projection (`<Name>.status.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    /// Current status
    pub status: ProjectionStatus,
    /// Token of the rebuild in progress, when one is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<RebuildToken>,
    /// Document schema version
    pub schema_version: String,
}

impl Default for StatusDocument {
    fn default() -> Self {
        Self {
            status: ProjectionStatus::Active,
            token: None,
            schema_version: "1.0".to_string(),
        }
    }
}
