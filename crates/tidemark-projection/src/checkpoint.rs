//! Projection checkpoints: the last consumed version per source stream.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tidemark_events::event::VersionToken;
use tidemark_events::hash::fingerprint;

/// Mapping from object identifier (`{objectName}__{objectId}`) to the last
/// consumed version token.
///
/// Entries are kept sorted by key so the canonical serialization, and with
/// it the fingerprint, is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    entries: BTreeMap<String, String>,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token` as the last consumed position for its object,
    /// overwriting any previous entry.
    pub fn update(&mut self, token: &VersionToken) {
        self.entries
            .insert(token.object_identifier(), token.to_string());
    }

    /// The recorded version for an object identifier.
    pub fn get(&self, object_identifier: &str) -> Option<&str> {
        self.entries.get(object_identifier).map(String::as_str)
    }

    /// Iterate over `(object identifier, version token)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the checkpoint is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical serialization: compact JSON over sorted keys.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.entries)?)
    }

    /// SHA-256 fingerprint of the canonical serialization. Equal
    /// checkpoints fingerprint identically; any entry change produces a
    /// different fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(fingerprint(&self.canonical_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(object_id: &str, version: i64) -> VersionToken {
        VersionToken::new("company", object_id, object_id, version)
    }

    #[test]
    fn test_update_inserts_and_overwrites() {
        let mut checkpoint = Checkpoint::new();

        checkpoint.update(&token("company-1", 3));
        assert_eq!(
            checkpoint.get("company__company-1"),
            Some(format!("company__company-1__company-1__{:020}", 3).as_str())
        );

        checkpoint.update(&token("company-1", 7));
        assert_eq!(checkpoint.len(), 1);
        assert!(checkpoint
            .get("company__company-1")
            .unwrap()
            .ends_with(&format!("{:020}", 7)));
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let mut forward = Checkpoint::new();
        forward.update(&token("company-1", 1));
        forward.update(&token("company-2", 2));

        let mut backward = Checkpoint::new();
        backward.update(&token("company-2", 2));
        backward.update(&token("company-1", 1));

        assert_eq!(
            forward.fingerprint().unwrap(),
            backward.fingerprint().unwrap()
        );
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let mut checkpoint = Checkpoint::new();
        checkpoint.update(&token("company-1", 1));
        let before = checkpoint.fingerprint().unwrap();

        checkpoint.update(&token("company-1", 2));
        assert_ne!(checkpoint.fingerprint().unwrap(), before);
    }

    #[test]
    fn test_wire_form_is_a_plain_map() {
        let mut checkpoint = Checkpoint::new();
        checkpoint.update(&token("company-1", 1));

        let json = serde_json::to_value(&checkpoint).unwrap();
        assert!(json.is_object());
        assert!(json.get("company__company-1").is_some());

        let round_trip: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(round_trip, checkpoint);
    }
}
