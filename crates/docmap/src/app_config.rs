//! 🔧 App Configuration. TOML and env vars in, one `AppConfig` out.
//!
//! 📡 "It worked on my machine." Said about a config file that only existed on their machine 🦆
//!
//! ```toml
//! [store.Elasticsearch]
//! url = "http://localhost:9200"
//!
//! [queue]
//! flush_interval_ms = 500
//!
//! [queue.retry]
//! max_attempts = 5
//!
//! [schema.types.Book]
//! index = "library"
//! properties = ["title"]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::StoreConfig;
use crate::queue::RetryPolicy;
use crate::schema::SchemaConfig;

/// 📦 Everything a [`DocMapper`](crate::mapper::DocMapper) needs to know about itself.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// 🏪 Where documents live. In memory unless told otherwise.
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// 📬 Write-queue knobs.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// ⏰ How often the flush worker looks at the queue.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// 🔔 How many flush requests may pile up before the worker gets to them.
    #[serde(default = "default_trigger_capacity")]
    pub trigger_capacity: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_trigger_capacity() -> usize {
    16
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            trigger_capacity: default_trigger_capacity(),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// 🚀 Load the config from `DOCMAP_*` env vars, plus a TOML file when one is given.
///
/// 📐 No file means env vars only. A file is merged on top of the env, so TOML wins
/// on conflicts. Nested keys in env vars use `__`: `DOCMAP_QUEUE__FLUSH_INTERVAL_MS=250`.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("DOCMAP_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DOCMAP_*). \
             Either the file is lying or the environment is. Possibly both.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DOCMAP_*). \
                 No file was provided, so this one is entirely on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ElasticsearchStoreConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_test_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 No temp file. The filesystem is having a day.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config. The disk said 'new phone who dis'.");
        file
    }

    #[test]
    fn the_one_where_everything_is_spelled_out() {
        let file = write_test_config(
            r#"
            [store.Elasticsearch]
            url = "http://es.local:9200"
            api_key = "c2VjcmV0"
            timeout_secs = 5

            [queue]
            flush_interval_ms = 250
            trigger_capacity = 2

            [queue.retry]
            max_attempts = 3
            initial_backoff_ms = 10

            [schema.types.Book]
            index = "library"
            properties = ["title"]
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 A complete config should parse.");

        match &config.store {
            StoreConfig::Elasticsearch(ElasticsearchStoreConfig {
                url,
                api_key,
                timeout_secs,
                connect_timeout_secs,
                ..
            }) => {
                assert_eq!(url, "http://es.local:9200");
                assert_eq!(api_key.as_deref(), Some("c2VjcmV0"));
                assert_eq!(*timeout_secs, 5);
                assert_eq!(*connect_timeout_secs, 10);
            }
            honestly_who_knows => panic!("💀 Expected an Elasticsearch store, got {honestly_who_knows:?}"),
        }
        assert_eq!(config.queue.flush_interval(), Duration::from_millis(250));
        assert_eq!(config.queue.trigger_capacity, 2);
        assert_eq!(config.queue.retry.max_attempts, Some(3));
        assert_eq!(config.queue.retry.initial_backoff_ms, 10);
        assert_eq!(config.queue.retry.max_backoff_ms, 10_000);
        assert!(config.schema.types.contains_key("Book"));
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            [schema.types.Author]
            properties = ["name"]
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 Defaults should fill in the gaps.");

        assert!(matches!(config.store, StoreConfig::InMemory));
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.queue.flush_interval_ms, 1000);
        assert_eq!(config.queue.trigger_capacity, 16);
        assert_eq!(config.queue.retry.max_attempts, None);
    }

    #[test]
    fn the_one_where_the_store_is_named_by_a_plain_string() {
        let file = write_test_config(r#"store = "InMemory""#);
        let config = load_config(Some(file.path())).expect("💀 A unit variant should parse.");
        assert!(matches!(config.store, StoreConfig::InMemory));
    }

    #[test]
    fn the_one_where_garbage_gets_a_useful_error() {
        let file = write_test_config(
            r#"
            [queue]
            flush_interval_ms = "soon-ish"
            "#,
        );

        let err = load_config(Some(file.path())).expect_err("💀 a string is not a number");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("Failed to parse configuration from file"), "{rendered}");
    }

    #[test]
    fn the_one_where_the_config_builds_a_schema() {
        let file = write_test_config(
            r#"
            [schema.types.Author]
            identity_type = "integer"
            properties = ["name"]

            [schema.types.Book]
            properties = ["title"]

            [schema.types.Book.fields.author]
            kind = "reference"
            target = "Author"
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 schema config should parse");
        let schema = config
            .schema
            .build(crate::converters::ConverterRegistry::default())
            .expect("💀 and it should validate");
        assert_eq!(schema.store_type_name("Book"), Some("book"));
        assert_eq!(schema.index_name("Book"), Some("book"));
    }
}
