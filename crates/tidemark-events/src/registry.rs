//! Store registry: route operations to implementations by configured type
//! key.

use crate::config::EventStoreOptions;
use crate::data_store::EventDataStore;
use crate::document::StreamInformation;
use crate::document_store::ObjectDocumentStore;
use crate::error::{EventError, Result};
use crate::snapshot::SnapshotStore;
use crate::tags::TagStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping type keys (e.g. `"blob"`) to store implementations.
///
/// Keys are case-insensitive. A `StreamInformation` may override the
/// configured default per field; resolution precedence is field value,
/// then connection name, then the configured default.
#[derive(Default)]
pub struct StoreRegistry {
    data_stores: RwLock<HashMap<String, Arc<dyn EventDataStore>>>,
    document_stores: RwLock<HashMap<String, Arc<dyn ObjectDocumentStore>>>,
    document_tag_stores: RwLock<HashMap<String, Arc<dyn TagStore>>>,
    stream_tag_stores: RwLock<HashMap<String, Arc<dyn TagStore>>>,
    snapshot_stores: RwLock<HashMap<String, Arc<dyn SnapshotStore>>>,
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

fn resolve<T: ?Sized>(
    map: &RwLock<HashMap<String, Arc<T>>>,
    key: &str,
) -> Result<Arc<T>> {
    map.read()
        .get(&normalize(key))
        .cloned()
        .ok_or_else(|| EventError::UnknownStoreType(key.to_string()))
}

/// Pick the first non-blank key from the precedence chain.
fn first_key<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|key| !key.trim().is_empty())
        .unwrap_or("")
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data store under a type key.
    pub fn register_data_store(&self, key: &str, store: Arc<dyn EventDataStore>) {
        self.data_stores.write().insert(normalize(key), store);
    }

    /// Register a document store under a type key.
    pub fn register_document_store(&self, key: &str, store: Arc<dyn ObjectDocumentStore>) {
        self.document_stores.write().insert(normalize(key), store);
    }

    /// Register a document tag store under a type key.
    pub fn register_document_tag_store(&self, key: &str, store: Arc<dyn TagStore>) {
        self.document_tag_stores.write().insert(normalize(key), store);
    }

    /// Register a stream tag store under a type key.
    pub fn register_stream_tag_store(&self, key: &str, store: Arc<dyn TagStore>) {
        self.stream_tag_stores.write().insert(normalize(key), store);
    }

    /// Register a snapshot store under a type key.
    pub fn register_snapshot_store(&self, key: &str, store: Arc<dyn SnapshotStore>) {
        self.snapshot_stores.write().insert(normalize(key), store);
    }

    /// Resolve a data store by explicit key.
    pub fn data_store(&self, key: &str) -> Result<Arc<dyn EventDataStore>> {
        resolve(&self.data_stores, key)
    }

    /// Resolve a document store by explicit key.
    pub fn document_store(&self, key: &str) -> Result<Arc<dyn ObjectDocumentStore>> {
        resolve(&self.document_stores, key)
    }

    /// Resolve the data store serving a stream.
    pub fn data_store_for(
        &self,
        info: &StreamInformation,
        options: &EventStoreOptions,
    ) -> Result<Arc<dyn EventDataStore>> {
        resolve(
            &self.data_stores,
            first_key(&[
                &info.data_store,
                &info.stream_connection_name,
                &options.stream_type,
            ]),
        )
    }

    /// Resolve the document store serving a stream.
    pub fn document_store_for(
        &self,
        info: &StreamInformation,
        options: &EventStoreOptions,
    ) -> Result<Arc<dyn ObjectDocumentStore>> {
        resolve(
            &self.document_stores,
            first_key(&[&info.document_type, &options.document_type]),
        )
    }

    /// Resolve the document tag store serving a stream.
    pub fn document_tag_store_for(
        &self,
        info: &StreamInformation,
        options: &EventStoreOptions,
    ) -> Result<Arc<dyn TagStore>> {
        resolve(
            &self.document_tag_stores,
            first_key(&[
                &info.document_tag_store,
                &info.document_tag_connection_name,
                &options.document_tag_type,
            ]),
        )
    }

    /// Resolve the stream tag store serving a stream.
    pub fn stream_tag_store_for(
        &self,
        info: &StreamInformation,
        options: &EventStoreOptions,
    ) -> Result<Arc<dyn TagStore>> {
        resolve(
            &self.stream_tag_stores,
            first_key(&[
                &info.stream_tag_store,
                &info.stream_tag_connection_name,
                &options.event_stream_tag_type,
            ]),
        )
    }

    /// Resolve the snapshot store serving a stream.
    pub fn snapshot_store_for(
        &self,
        info: &StreamInformation,
        options: &EventStoreOptions,
    ) -> Result<Arc<dyn SnapshotStore>> {
        resolve(
            &self.snapshot_stores,
            first_key(&[
                &info.snapshot_store,
                &info.snapshot_connection_name,
                &options.default_snapshot_store,
            ]),
        )
    }
}
