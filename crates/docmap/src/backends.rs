//! 🔌 Backends: where the search-index store actually lives.
//!
//! 🎬 *[the unmarshaller needs a record it has never seen. the queue has a batch to ship.]*
//! *[both of them knock on the same door.]*
//!
//! 🧠 Knowledge graph:
//! - Pattern: [`Store`] trait → concrete impls ([`ElasticsearchStore`], [`InMemoryStore`])
//!   → [`StoreBackend`] enum dispatch, so callers never care where the bytes go.
//! - `get` feeds the unmarshaller's live reference fetches.
//! - `submit_batch` feeds the write queue. One call, one batch, one result per item.
//! - `ensure_index` feeds `docmap install`.
//! - Stores do I/O. Dedup, retry and reconciliation belong to the queue. 🦆

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::common::{BulkItemResult, BulkOperation, Document};

pub(crate) mod elasticsearch;
pub(crate) mod in_mem;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use in_mem::InMemoryStore;

/// 🏪 The store boundary.
///
/// # Contract 📜
/// - `get` returns `Ok(None)` when the document does not exist. `Err` means we could not ask.
/// - `submit_batch` returns `Err` only when the whole batch failed in transport. Per-item
///   failures come back as `BulkItemResult { success: false, .. }`. Results are in request
///   order; a store may return fewer results than operations, and the missing ones count
///   as unacknowledged.
/// - `ensure_index` creates the index with the given definition, and is a no-op when it exists.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync {
    /// 🔎 Fetch one stored document by index, store type and identity.
    async fn get(&self, index: &str, type_name: &str, id: &str) -> Result<Option<Document>>;
    /// 📦 Submit one batch of index/delete operations.
    async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<Vec<BulkItemResult>>;
    /// 🏗️ Create an index from its definition unless it already exists.
    async fn ensure_index(&self, index: &str, definition: &Value) -> Result<()>;
}

/// ⚙️ Which store to talk to. `store = "InMemory"` or `[store.Elasticsearch]` in TOML.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum StoreConfig {
    Elasticsearch(ElasticsearchStoreConfig),
    #[default]
    InMemory,
}

/// 🎭 The many faces of a Store.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Elasticsearch(ElasticsearchStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🚀 Build the configured backend. No network traffic happens here.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(match config {
            StoreConfig::Elasticsearch(es) => StoreBackend::Elasticsearch(ElasticsearchStore::new(es.clone())?),
            StoreConfig::InMemory => StoreBackend::InMemory(InMemoryStore::new()),
        })
    }
}

#[async_trait]
impl Store for StoreBackend {
    async fn get(&self, index: &str, type_name: &str, id: &str) -> Result<Option<Document>> {
        match self {
            StoreBackend::Elasticsearch(store) => store.get(index, type_name, id).await,
            StoreBackend::InMemory(store) => store.get(index, type_name, id).await,
        }
    }

    async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<Vec<BulkItemResult>> {
        match self {
            StoreBackend::Elasticsearch(store) => store.submit_batch(operations).await,
            StoreBackend::InMemory(store) => store.submit_batch(operations).await,
        }
    }

    async fn ensure_index(&self, index: &str, definition: &Value) -> Result<()> {
        match self {
            StoreBackend::Elasticsearch(store) => store.ensure_index(index, definition).await,
            StoreBackend::InMemory(store) => store.ensure_index(index, definition).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_in_memory_is_the_default_store() -> Result<()> {
        let backend = StoreBackend::from_config(&StoreConfig::default())?;
        assert!(matches!(backend, StoreBackend::InMemory(_)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_enum_forwards_to_the_real_thing() -> Result<()> {
        let store = InMemoryStore::new();
        store.put("library", "book", "1", serde_json::json!({"title": "Dune"})).await?;
        let backend = StoreBackend::InMemory(store);
        let doc = backend.get("library", "book", "1").await?;
        assert_eq!(doc.and_then(|d| d.get("title").cloned()), Some(Value::from("Dune")));
        Ok(())
    }
}
