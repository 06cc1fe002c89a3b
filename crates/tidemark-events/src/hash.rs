//! Canonical serialization and the document/stream hash chain.
//!
//! The canonical form is the compact (no whitespace) `serde_json`
//! serialization of the camelCase document identity and configuration.
//! Excluded from the digest input are the hash fields themselves and the
//! per-stream bookkeeping an append mutates (`currentStreamVersion`,
//! `streamChunks`, `snapShots`): a document revision that only advanced
//! its counters hashes identically, so persisting it after an append
//! leaves the stream binding valid. Changing actual configuration changes
//! the hash, which is exactly what the chain exists to detect; such
//! changes go through the active-configuration migration, which re-binds
//! the stream head. Field order is struct declaration order; the canonical
//! bytes are pinned by an anchor test below.

use crate::document::{ChunkSettings, ObjectDocument, StreamInformation};
use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Sentinel hash meaning "unbound / any": a stream carrying this value
/// accepts a document with any hash.
pub const UNBOUND_HASH: &str = "*";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalStreamInformation<'a> {
    stream_identifier: &'a str,
    stream_type: &'a str,
    document_type: &'a str,
    data_store: &'a str,
    snapshot_store: &'a str,
    document_tag_store: &'a str,
    stream_tag_store: &'a str,
    stream_connection_name: &'a str,
    snapshot_connection_name: &'a str,
    document_tag_connection_name: &'a str,
    stream_tag_connection_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_settings: Option<ChunkSettings>,
    document_tag_type: &'a str,
    event_stream_tag_type: &'a str,
    document_ref_type: &'a str,
}

impl<'a> From<&'a StreamInformation> for CanonicalStreamInformation<'a> {
    fn from(info: &'a StreamInformation) -> Self {
        Self {
            stream_identifier: &info.stream_identifier,
            stream_type: &info.stream_type,
            document_type: &info.document_type,
            data_store: &info.data_store,
            snapshot_store: &info.snapshot_store,
            document_tag_store: &info.document_tag_store,
            stream_tag_store: &info.stream_tag_store,
            stream_connection_name: &info.stream_connection_name,
            snapshot_connection_name: &info.snapshot_connection_name,
            document_tag_connection_name: &info.document_tag_connection_name,
            stream_tag_connection_name: &info.stream_tag_connection_name,
            chunk_settings: info.chunk_settings,
            document_tag_type: &info.document_tag_type,
            event_stream_tag_type: &info.event_stream_tag_type,
            document_ref_type: &info.document_ref_type,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalDocumentBody<'a> {
    object_id: &'a str,
    object_name: &'a str,
    active: CanonicalStreamInformation<'a>,
    terminated_streams: Vec<CanonicalStreamInformation<'a>>,
    schema_version: &'a str,
    document_path: &'a str,
}

/// Serialize the canonical body of a document.
pub fn canonical_body_bytes(doc: &ObjectDocument) -> Result<Vec<u8>> {
    let body = CanonicalDocumentBody {
        object_id: &doc.object_id,
        object_name: &doc.object_name,
        active: (&doc.active).into(),
        terminated_streams: doc.terminated_streams.iter().map(Into::into).collect(),
        schema_version: &doc.schema_version,
        document_path: &doc.document_path,
    };
    Ok(serde_json::to_vec(&body)?)
}

/// SHA-256 of the canonical document body, lowercase hex.
pub fn document_hash(doc: &ObjectDocument) -> Result<String> {
    Ok(fingerprint(&canonical_body_bytes(doc)?))
}

/// SHA-256 of arbitrary bytes, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Whether a stream's recorded document hash accepts the given document
/// hash: exact match, the unbound sentinel, or a document that has never
/// been hashed.
pub fn chain_matches(stream_hash: &str, document_hash: &str) -> bool {
    stream_hash == UNBOUND_HASH || document_hash.is_empty() || stream_hash == document_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::StreamChunk;

    #[test]
    fn test_canonical_body_anchor() {
        let doc = ObjectDocument::new("order", "o-1");
        let body = String::from_utf8(canonical_body_bytes(&doc).unwrap()).unwrap();

        // Anchor vector: any change to this string is a breaking change to
        // every stored document hash.
        let expected = concat!(
            r#"{"objectId":"o-1","objectName":"order","active":{"#,
            r#""streamIdentifier":"o-1","streamType":"","documentType":"","#,
            r#""dataStore":"","snapshotStore":"","documentTagStore":"","#,
            r#""streamTagStore":"","streamConnectionName":"","#,
            r#""snapshotConnectionName":"","documentTagConnectionName":"","#,
            r#""streamTagConnectionName":"","documentTagType":"","#,
            r#""eventStreamTagType":"","documentRefType":""},"#,
            r#""terminatedStreams":[],"schemaVersion":"1.0","#,
            r#""documentPath":"order/o-1.json"}"#
        );
        assert_eq!(body, expected);
    }

    #[test]
    fn test_document_hash_is_lowercase_hex() {
        let doc = ObjectDocument::new("order", "o-1");
        let hash = document_hash(&doc).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_stable_across_append_bookkeeping() {
        let mut doc = ObjectDocument::new("order", "o-1");
        let before = document_hash(&doc).unwrap();

        doc.active.current_stream_version = 42;
        doc.active.stream_chunks.push(StreamChunk {
            chunk_identifier: 0,
            first_event_version: 0,
            last_event_version: 42,
        });
        assert_eq!(document_hash(&doc).unwrap(), before);
    }

    #[test]
    fn test_hash_changes_with_configuration() {
        let mut doc = ObjectDocument::new("order", "o-1");
        let before = document_hash(&doc).unwrap();

        doc.active.document_tag_store = "store-a".to_string();
        assert_ne!(document_hash(&doc).unwrap(), before);
    }

    #[test]
    fn test_hash_fields_do_not_feed_digest() {
        let mut doc = ObjectDocument::new("order", "o-1");
        let before = document_hash(&doc).unwrap();

        doc.hash = "something".to_string();
        doc.prev_hash = "else".to_string();
        assert_eq!(document_hash(&doc).unwrap(), before);
    }

    #[test]
    fn test_document_identity_feeds_digest() {
        let doc = ObjectDocument::new("order", "o-1");
        let other = ObjectDocument::new("order", "o-2");
        assert_ne!(document_hash(&doc).unwrap(), document_hash(&other).unwrap());
    }

    #[test]
    fn test_chain_matches() {
        assert!(chain_matches("*", "abc"));
        assert!(chain_matches("abc", "abc"));
        assert!(chain_matches("abc", ""));
        assert!(!chain_matches("abc", "def"));
    }

    #[test]
    fn test_fingerprint_equality_follows_bytes() {
        assert_eq!(fingerprint(b"{}"), fingerprint(b"{}"));
        assert_ne!(fingerprint(b"{}"), fingerprint(b"{ }"));
    }
}
