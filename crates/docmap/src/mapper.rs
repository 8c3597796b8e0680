//! 🗺️ DocMapper: the front door. One schema, one store, one write queue, one
//! unmarshaller, all sharing the same `Arc`s.
//!
//! 🎬 *[the config file says "Elasticsearch". the DocMapper nods, builds a client,]*
//! *[validates the schema, and hands everyone the same copy of both.]*

use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::info;

use crate::app_config::{AppConfig, QueueConfig};
use crate::backends::{Store, StoreBackend};
use crate::common::{EntityKey, SearchHit};
use crate::converters::ConverterRegistry;
use crate::marshall::Searchable;
use crate::queue::WriteQueue;
use crate::records::RecordGraph;
use crate::schema::MappingSchema;
use crate::schema::index_definition::index_definition;
use crate::unmarshall::Unmarshaller;
use crate::unmarshall::error::UnmarshallError;
use crate::workers::{FlushTrigger, FlushWorker, Worker};

#[derive(Debug)]
pub struct DocMapper<S: Store = StoreBackend> {
    schema: Arc<MappingSchema>,
    store: Arc<S>,
    queue: WriteQueue<S>,
    unmarshaller: Unmarshaller<S>,
    queue_config: QueueConfig,
}

impl DocMapper<StoreBackend> {
    /// 🏗️ Build everything from configuration, with the stock converters.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::from_config_with_converters(config, ConverterRegistry::default())
    }

    /// 🏗️ Same, but you bring your own converters. Field mappings name them.
    pub fn from_config_with_converters(config: &AppConfig, converters: ConverterRegistry) -> Result<Self> {
        let schema = config
            .schema
            .build(converters)
            .context("💀 The schema configuration does not describe a valid mapping")?;
        let store = StoreBackend::from_config(&config.store).context("💀 Failed to set up the store backend")?;
        info!(
            "🗺️ DocMapper ready: {} mapped type(s), {} root",
            schema.types().count(),
            schema.root_types().count()
        );
        Ok(Self::new(schema, store, config.queue.clone()))
    }
}

impl<S: Store + 'static> DocMapper<S> {
    pub fn new(schema: MappingSchema, store: S, queue_config: QueueConfig) -> Self {
        let schema = Arc::new(schema);
        let store = Arc::new(store);
        Self {
            queue: WriteQueue::new(Arc::clone(&schema), Arc::clone(&store), queue_config.retry.clone()),
            unmarshaller: Unmarshaller::new(Arc::clone(&schema), Arc::clone(&store)),
            schema,
            store,
            queue_config,
        }
    }

    pub fn schema(&self) -> &MappingSchema {
        &self.schema
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &WriteQueue<S> {
        &self.queue
    }

    pub fn unmarshaller(&self) -> &Unmarshaller<S> {
        &self.unmarshaller
    }

    /// ✍️ Shorthand for `queue().enqueue_index(..)`.
    pub fn index(&self, entity: &impl Searchable) -> Result<EntityKey> {
        self.queue.enqueue_index(entity)
    }

    /// 🗑️ Shorthand for `queue().enqueue_delete(..)`.
    pub fn delete(&self, entity: &impl Searchable) -> Result<EntityKey> {
        self.queue.enqueue_delete(entity)
    }

    /// 🔍 Fetch one root record by id and rebuild it. `Ok(None)` when the store has no such document.
    pub async fn load(&self, type_name: &str, id: &str) -> Result<Option<RecordGraph>, UnmarshallError> {
        self.unmarshaller.load(type_name, id).await
    }

    /// 🔍 Turn search hits back into records.
    pub async fn results(&self, hits: &[SearchHit]) -> Result<Vec<RecordGraph>, UnmarshallError> {
        self.unmarshaller.build_results(hits).await
    }

    /// 📐 One definition per index. Root types sharing an index share its properties.
    pub fn index_definitions(&self) -> Result<IndexMap<String, Value>> {
        let mut per_index: IndexMap<String, Map<String, Value>> = IndexMap::new();
        for type_mapping in self.schema.root_types() {
            let definition = index_definition(&self.schema, &type_mapping.name)?;
            let properties = definition
                .pointer("/mappings/properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            per_index
                .entry(type_mapping.index_name.clone())
                .or_default()
                .extend(properties);
        }
        Ok(per_index
            .into_iter()
            .map(|(index, properties)| (index, json!({ "mappings": { "properties": properties } })))
            .collect())
    }

    /// 🏗️ Make sure every index a root type lives in exists. Returns the index names.
    pub async fn install_indices(&self) -> Result<Vec<String>> {
        let mut installed = Vec::new();
        for (index, definition) in self.index_definitions()? {
            self.store
                .ensure_index(&index, &definition)
                .await
                .with_context(|| format!("💀 Failed to install index '{index}'"))?;
            info!("🏗️ Index '{}' is in place", index);
            installed.push(index);
        }
        Ok(installed)
    }

    /// ⏰ Start the background flusher with the configured interval.
    /// Drop every [`FlushTrigger`] to make it flush one last time and stop.
    pub fn start_flush_worker(&self) -> (JoinHandle<Result<()>>, FlushTrigger) {
        let (worker, trigger) = FlushWorker::new(
            self.queue.clone(),
            self.queue_config.flush_interval(),
            self.queue_config.trigger_capacity,
        );
        (worker.start(), trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use crate::marshall::DocumentEntity;
    use crate::records::FieldValue;
    use crate::schema::tests::library_schema;
    use crate::schema::{SchemaConfig, TypeConfig};

    fn mapper() -> (DocMapper<InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        (DocMapper::new(library_schema(), store.clone(), QueueConfig::default()), store)
    }

    #[test]
    fn the_one_where_the_default_config_maps_nothing_in_memory() -> Result<()> {
        let mapper = DocMapper::from_config(&AppConfig::default())?;
        assert!(matches!(mapper.store(), StoreBackend::InMemory(_)));
        assert_eq!(mapper.schema().types().count(), 0);
        Ok(())
    }

    #[test]
    fn the_one_where_a_broken_schema_config_stops_the_show() {
        let mut config = AppConfig {
            schema: SchemaConfig::default(),
            ..AppConfig::default()
        };
        let mut book: TypeConfig = toml::from_str(
            r#"
            [fields.author]
            kind = "reference"
            target = "Ghost"
            "#,
        )
        .expect("💀 type config should parse");
        book.properties.push("title".into());
        config.schema.types.insert("Book".into(), book);

        let err = DocMapper::from_config(&config).expect_err("a reference to nobody must fail");
        assert!(format!("{err:#}").contains("Ghost"), "{err:#}");
    }

    #[tokio::test]
    async fn the_one_where_shared_indices_get_one_merged_definition() -> Result<()> {
        let (mapper, store) = mapper();

        let installed = mapper.install_indices().await?;
        assert_eq!(installed, vec!["library".to_string()]);

        let indices = store.indices().await;
        let properties = indices["library"]
            .pointer("/mappings/properties")
            .and_then(Value::as_object)
            .expect("properties");
        // 📚 Author's and Book's fields side by side
        assert!(properties.contains_key("name"));
        assert!(properties.contains_key("title"));
        assert!(properties.contains_key("chapters"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_book_goes_in_and_comes_back_out() -> Result<()> {
        let (mapper, store) = mapper();
        store.put("library", "author", "7", json!({"name": "Herbert"})).await?;

        let Value::Object(document) = json!({
            "title": "Dune",
            "pages": "412",
            "author": {"id": 7},
        }) else {
            unreachable!()
        };
        mapper.index(&DocumentEntity {
            type_name: "Book".into(),
            id: json!("1"),
            document,
        })?;
        let report = mapper.queue().flush_with_retries().await;
        assert_eq!(report.succeeded, 1);

        let book = mapper.load("Book", "1").await?.expect("Book#1 was just indexed");
        let root = book.root_record();
        assert_eq!(root.field("pages"), Some(&FieldValue::Value(json!(412))));
        let author = root
            .field("author")
            .and_then(FieldValue::as_record)
            .and_then(|id| book.record(id))
            .expect("the author is rebuilt");
        assert_eq!(author.field("name"), Some(&FieldValue::Value(json!("Herbert"))));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_worker_cleans_up_on_the_way_out() -> Result<()> {
        let (mapper, store) = mapper();
        let (handle, trigger) = mapper.start_flush_worker();

        mapper.queue().enqueue_delete_key(EntityKey::new("Book", "1"))?;
        drop(trigger);
        handle.await??;

        assert!(mapper.queue().is_empty());
        assert_eq!(store.batches().await.len(), 1);
        Ok(())
    }
}
