use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::backends::Store;
use crate::common::{BulkAction, BulkItemResult, BulkOperation, Document};

/// (index, store type, id). Types sharing an index keep their ids apart.
type DocKey = (String, String, String);

#[derive(Debug, Default)]
struct InMemoryState {
    documents: HashMap<DocKey, Document>,
    batches: Vec<Vec<BulkOperation>>,
    indices: IndexMap<String, Value>,
    failing_batches: usize,
    failing_gets: usize,
    failing_items: HashMap<(String, String), usize>,
    withheld_acks: usize,
    latency: Option<Duration>,
}

/// 📦 A store that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// Holds documents in a map, records every batch it was handed, and can be told to
/// misbehave: fail whole batches, fail single items, or forget to acknowledge the tail
/// of a batch. Clone-able because tests hand one copy to the queue and keep one to peek. 🦆
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<tokio::sync::Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📥 Seed one document, as if someone had indexed it earlier.
    pub async fn put(&self, index: &str, type_name: &str, id: &str, source: Value) -> Result<()> {
        let Value::Object(document) = source else {
            bail!("💀 Only JSON objects can be stored as documents, got {source}");
        };
        self.state
            .lock()
            .await
            .documents
            .insert((index.to_string(), type_name.to_string(), id.to_string()), document);
        Ok(())
    }

    pub async fn document(&self, index: &str, type_name: &str, id: &str) -> Option<Document> {
        self.state
            .lock()
            .await
            .documents
            .get(&(index.to_string(), type_name.to_string(), id.to_string()))
            .cloned()
    }

    pub async fn document_count(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    /// Every batch ever submitted, failed ones included, in submission order.
    pub async fn batches(&self) -> Vec<Vec<BulkOperation>> {
        self.state.lock().await.batches.clone()
    }

    pub async fn indices(&self) -> IndexMap<String, Value> {
        self.state.lock().await.indices.clone()
    }

    /// 💥 The next `count` batches fail in transport.
    pub async fn fail_next_batches(&self, count: usize) {
        self.state.lock().await.failing_batches = count;
    }

    /// 💥 The next `count` fetches fail in transport.
    pub async fn fail_next_gets(&self, count: usize) {
        self.state.lock().await.failing_gets = count;
    }

    /// 💥 The next `times` submissions of this item come back as failed.
    pub async fn fail_item(&self, type_name: &str, id: &str, times: usize) {
        self.state
            .lock()
            .await
            .failing_items
            .insert((type_name.to_string(), id.to_string()), times);
    }

    /// 🙈 The next batch reports no result for its last `count` operations.
    pub async fn withhold_acks(&self, count: usize) {
        self.state.lock().await.withheld_acks = count;
    }

    /// 🐢 Every batch takes this long, with the lock released.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = Some(latency);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, index: &str, type_name: &str, id: &str) -> Result<Option<Document>> {
        let mut state = self.state.lock().await;
        if state.failing_gets > 0 {
            state.failing_gets -= 1;
            bail!("💀 scripted fetch failure for {type_name}#{id}");
        }
        Ok(state
            .documents
            .get(&(index.to_string(), type_name.to_string(), id.to_string()))
            .cloned())
    }

    async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<Vec<BulkItemResult>> {
        let latency = {
            let mut state = self.state.lock().await;
            state.batches.push(operations.to_vec());
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_batches > 0 {
            state.failing_batches -= 1;
            bail!("💀 scripted transport failure for a batch of {}", operations.len());
        }
        let mut results = Vec::with_capacity(operations.len());
        for operation in operations {
            let item = (operation.type_name.clone(), operation.id.clone());
            if let Some(remaining) = state.failing_items.get_mut(&item)
                && *remaining > 0
            {
                *remaining -= 1;
                results.push(BulkItemResult::failed(&operation.type_name, &operation.id, "scripted item failure"));
                continue;
            }
            let key = (operation.index.clone(), operation.type_name.clone(), operation.id.clone());
            match (operation.action, &operation.body) {
                (BulkAction::Index, Some(body)) => {
                    state.documents.insert(key, body.clone());
                }
                (BulkAction::Index, None) => {
                    results.push(BulkItemResult::failed(&operation.type_name, &operation.id, "index without a body"));
                    continue;
                }
                (BulkAction::Delete, _) => {
                    state.documents.remove(&key);
                }
            }
            results.push(BulkItemResult::ok(&operation.type_name, &operation.id));
        }
        let withheld = std::mem::take(&mut state.withheld_acks).min(results.len());
        results.truncate(results.len() - withheld);
        debug!("📦 in-memory batch of {} applied, {} results returned", operations.len(), results.len());
        Ok(results)
    }

    async fn ensure_index(&self, index: &str, definition: &Value) -> Result<()> {
        self.state
            .lock()
            .await
            .indices
            .entry(index.to_string())
            .or_insert_with(|| definition.clone());
        Ok(())
    }
}
