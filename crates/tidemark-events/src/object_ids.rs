//! Object-id provider: enumerate objects by listing document blobs.

use crate::config::EventStoreOptions;
use crate::error::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tidemark_storage::blob::{BlobPath, BlobStore};

/// One page of object ids.
#[derive(Debug, Clone, Default)]
pub struct ObjectIdPage {
    /// Object ids in this page, in listing order, deduplicated
    pub items: Vec<String>,
    /// Continuation token for the next page
    pub next: Option<String>,
}

/// Enumerates, counts, and probes object ids by listing the document
/// container.
pub struct ObjectIdProvider {
    store: Arc<dyn BlobStore>,
    options: EventStoreOptions,
}

impl ObjectIdProvider {
    /// Create a provider over the document container.
    pub fn new(store: Arc<dyn BlobStore>, options: EventStoreOptions) -> Self {
        Self { store, options }
    }

    fn prefix(object_name: &str) -> String {
        format!("{}/", object_name.to_lowercase())
    }

    /// Parse an object id out of a document blob name, skipping anything
    /// that is not a direct `<objectId>.json` child of the prefix.
    fn parse_object_id(name: &str, prefix: &str) -> Option<String> {
        let stem = name.strip_prefix(prefix)?.strip_suffix(".json")?;
        if stem.is_empty() || stem.contains('/') {
            return None;
        }
        Some(stem.to_string())
    }

    /// List object ids for `object_name`, one page at a time.
    pub async fn get_object_ids(
        &self,
        object_name: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<ObjectIdPage> {
        let prefix = Self::prefix(object_name);
        let page = match self
            .store
            .list_prefix(
                &self.options.default_document_container_name,
                &prefix,
                continuation,
                page_size,
            )
            .await
        {
            Ok(page) => page,
            Err(err) if err.is_not_found() => return Ok(ObjectIdPage::default()),
            Err(err) => return Err(err.into()),
        };

        let mut seen = HashSet::new();
        let items = page
            .items
            .iter()
            .filter_map(|item| Self::parse_object_id(&item.name, &prefix))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Ok(ObjectIdPage {
            items,
            next: page.next,
        })
    }

    /// Whether a document exists for `(object_name, object_id)`.
    pub async fn exists(&self, object_name: &str, object_id: &str) -> Result<bool> {
        let path = BlobPath::new(
            self.options.default_document_container_name.clone(),
            format!("{}/{}.json", object_name.to_lowercase(), object_id),
        );
        Ok(self.store.exists(&path).await?)
    }

    /// Count all objects of `object_name` by full enumeration.
    pub async fn count(&self, object_name: &str) -> Result<usize> {
        let mut total = HashSet::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .get_object_ids(object_name, continuation.as_deref(), 1000)
                .await?;
            total.extend(page.items);

            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        Ok(total.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tidemark_storage::blob::UploadOptions;
    use tidemark_storage::memory::InMemoryBlobStore;

    async fn seeded_provider(ids: &[&str]) -> ObjectIdProvider {
        let store = Arc::new(InMemoryBlobStore::with_containers(&["documents"]));
        for id in ids {
            store
                .upload(
                    &BlobPath::new("documents", format!("order/{id}.json")),
                    Bytes::from("{}"),
                    UploadOptions::json(),
                )
                .await
                .unwrap();
        }
        ObjectIdProvider::new(store, EventStoreOptions::default())
    }

    #[tokio::test]
    async fn test_lists_ids_under_prefix() {
        let provider = seeded_provider(&["o-1", "o-2", "o-3"]).await;

        let page = provider.get_object_ids("order", None, 10).await.unwrap();
        assert_eq!(page.items, vec!["o-1", "o-2", "o-3"]);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_pagination() {
        let provider = seeded_provider(&["o-1", "o-2", "o-3"]).await;

        let first = provider.get_object_ids("order", None, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let marker = first.next.expect("expected continuation");

        let second = provider
            .get_object_ids("order", Some(&marker), 2)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_skips_nested_and_foreign_blobs() {
        let store = Arc::new(InMemoryBlobStore::with_containers(&["documents"]));
        for name in [
            "order/o-1.json",
            "order/nested/x.json",
            "order/o-2.txt",
            "invoice/i-1.json",
        ] {
            store
                .upload(
                    &BlobPath::new("documents", name),
                    Bytes::from("{}"),
                    UploadOptions::json(),
                )
                .await
                .unwrap();
        }
        let provider = ObjectIdProvider::new(store, EventStoreOptions::default());

        let page = provider.get_object_ids("order", None, 10).await.unwrap();
        assert_eq!(page.items, vec!["o-1"]);
    }

    #[tokio::test]
    async fn test_missing_container_is_empty() {
        let store = Arc::new(InMemoryBlobStore::new());
        let provider = ObjectIdProvider::new(store, EventStoreOptions::default());

        let page = provider.get_object_ids("order", None, 10).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(provider.count("order").await.unwrap(), 0);
        assert!(!provider.exists("order", "o-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_and_count() {
        let provider = seeded_provider(&["o-1", "o-2"]).await;

        assert!(provider.exists("order", "o-1").await.unwrap());
        assert!(!provider.exists("order", "o-9").await.unwrap());
        assert_eq!(provider.count("order").await.unwrap(), 2);
    }
}
