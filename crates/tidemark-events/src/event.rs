//! Event records, pending events, and version tokens.

use crate::error::{EventError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

const DEFAULT_SCHEMA_VERSION: i16 = 1;

fn default_schema_version() -> i16 {
    DEFAULT_SCHEMA_VERSION
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_schema_version(version: &i16) -> bool {
    *version == DEFAULT_SCHEMA_VERSION
}

/// A persisted event within a stream.
///
/// Wire form: `timestamp, payload, type, version, schemaVersion?, exseq?,
/// action?, metadata?`; `schemaVersion` is omitted when it equals 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Opaque JSON payload
    pub payload: String,
    /// Event type name
    #[serde(rename = "type")]
    pub event_type: String,
    /// Position of this event in its stream
    #[serde(rename = "version")]
    pub event_version: i64,
    /// Payload schema version
    #[serde(
        default = "default_schema_version",
        skip_serializing_if = "is_default_schema_version"
    )]
    pub schema_version: i16,
    /// External sequencer reference, when supplied by an upstream system
    #[serde(rename = "exseq", default, skip_serializing_if = "Option::is_none")]
    pub external_sequencer: Option<String>,
    /// Metadata about the action that produced the event
    #[serde(rename = "action", default, skip_serializing_if = "Option::is_none")]
    pub action_metadata: Option<serde_json::Value>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// An event supplied by the application, before a stream version has been
/// assigned to it.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    /// Event type name
    pub event_type: String,
    /// Opaque JSON payload
    pub payload: String,
    /// Payload schema version
    pub schema_version: i16,
    /// External sequencer reference
    pub external_sequencer: Option<String>,
    /// Metadata about the action that produced the event
    pub action_metadata: Option<serde_json::Value>,
    /// Free-form metadata
    pub metadata: Option<HashMap<String, String>>,
}

impl PendingEvent {
    /// Create a pending event with the default schema version.
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            schema_version: DEFAULT_SCHEMA_VERSION,
            external_sequencer: None,
            action_metadata: None,
            metadata: None,
        }
    }

    /// Set the payload schema version.
    pub fn with_schema_version(mut self, version: i16) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the external sequencer reference.
    pub fn with_external_sequencer(mut self, sequencer: impl Into<String>) -> Self {
        self.external_sequencer = Some(sequencer.into());
        self
    }

    /// Set action metadata.
    pub fn with_action_metadata(mut self, action: serde_json::Value) -> Self {
        self.action_metadata = Some(action);
        self
    }

    /// Set free-form metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Assign a stream version, producing the persisted record.
    pub fn into_record(self, event_version: i64) -> EventRecord {
        EventRecord {
            timestamp: Utc::now(),
            payload: self.payload,
            event_type: self.event_type,
            event_version,
            schema_version: self.schema_version,
            external_sequencer: self.external_sequencer,
            action_metadata: self.action_metadata,
            metadata: self.metadata,
        }
    }
}

/// Position of an event: object, stream, and version, encoded as
/// `{objectName}__{objectId}__{streamId}__{version:020}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken {
    /// Object name
    pub object_name: String,
    /// Object id
    pub object_id: String,
    /// Stream identifier
    pub stream_id: String,
    /// Event version within the stream
    pub version: i64,
}

impl VersionToken {
    /// Create a new version token.
    pub fn new(
        object_name: impl Into<String>,
        object_id: impl Into<String>,
        stream_id: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            object_id: object_id.into(),
            stream_id: stream_id.into(),
            version,
        }
    }

    /// Parse a token from its encoded form.
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split("__").collect();
        if parts.len() != 4 {
            return Err(EventError::InvalidVersionToken(value.to_string()));
        }

        let version: i64 = parts[3]
            .parse()
            .map_err(|_| EventError::InvalidVersionToken(value.to_string()))?;

        Ok(Self {
            object_name: parts[0].to_string(),
            object_id: parts[1].to_string(),
            stream_id: parts[2].to_string(),
            version,
        })
    }

    /// The `{objectName}__{objectId}` identifier used as a checkpoint key.
    pub fn object_identifier(&self) -> String {
        format!("{}__{}", self.object_name, self.object_id)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}__{}__{}__{:020}",
            self.object_name, self.object_id, self.stream_id, self.version
        )
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version_omitted_when_default() {
        let record = PendingEvent::new("Created", "{}").into_record(0);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("schemaVersion").is_none());
        assert_eq!(json["type"], "Created");
        assert_eq!(json["version"], 0);
    }

    #[test]
    fn test_schema_version_serialized_when_set() {
        let record = PendingEvent::new("Created", "{}")
            .with_schema_version(2)
            .into_record(0);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["schemaVersion"], 2);
    }

    #[test]
    fn test_schema_version_defaults_on_read() {
        let record: EventRecord = serde_json::from_str(
            r#"{"timestamp":"2024-05-01T00:00:00Z","payload":"{}","type":"Created","version":3}"#,
        )
        .unwrap();
        assert_eq!(record.schema_version, 1);
        assert_eq!(record.event_version, 3);
    }

    #[test]
    fn test_version_token_round_trip() {
        let token = VersionToken::new("order", "o-1", "o-1", 42);
        let encoded = token.to_string();
        assert_eq!(encoded, format!("order__o-1__o-1__{:020}", 42));

        let parsed = VersionToken::parse(&encoded).unwrap();
        assert_eq!(parsed, token);
        assert_eq!(parsed.object_identifier(), "order__o-1");
    }

    #[test]
    fn test_version_token_rejects_malformed() {
        assert!(VersionToken::parse("order__o-1__o-1").is_err());
        assert!(VersionToken::parse("order__o-1__o-1__notanumber").is_err());
    }

    #[test]
    fn test_version_token_ordering() {
        let older = VersionToken::new("order", "o-1", "o-1", 9);
        let newer = VersionToken::new("order", "o-1", "o-1", 10);
        assert!(older < newer);
    }
}
