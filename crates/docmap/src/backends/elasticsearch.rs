//! 📡 The Elasticsearch store: `_doc` GETs, NDJSON `_bulk` POSTs, index PUTs.
//!
//! 🎬 *[a reqwest client walks into a cluster. it asks for one document.]*
//! *[the cluster says 404. the client says "that's fine, actually". everyone is relieved.]*
//!
//! 🧠 Knowledge graph:
//! - `get` → `GET {url}/{index}/_doc/{id}`; 404 or `found: false` is `Ok(None)`. The id is
//!   percent-encoded as one path segment.
//! - `submit_batch` → `POST {url}/_bulk` with `application/x-ndjson`. Non-2xx means the whole
//!   batch failed in transport. 2xx means read `items[]` back positionally.
//! - `ensure_index` → `PUT {url}/{index}`; `resource_already_exists_exception` is success.
//! - Auth: api key beats basic auth. This is not a democracy.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, trace};

use crate::backends::Store;
use crate::common::{BulkAction, BulkItemResult, BulkOperation, Document};

/// ⚙️ Where the cluster is and how to get in.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchStoreConfig {
    /// 📡 Base URL, e.g. `http://localhost:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 Sent as `Authorization: ApiKey ..`, and wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

// 🐢 bulk bodies can be meaty
fn default_timeout_secs() -> u64 {
    30
}

impl ElasticsearchStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: ElasticsearchStoreConfig,
}

/// 📬 The parts of a `_bulk` response we care about.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl ElasticsearchStore {
    /// 🚀 Build the HTTP client. Unlike a sink, a store does not ping on startup:
    /// `docmap mappings` should work with the cluster switched off.
    pub fn new(config: ElasticsearchStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a missing TLS cert or a cursed system OpenSSL.")?;
        Ok(Self { client, config })
    }

    /// 🔗 `{url}/{segment}/{segment}..`, every segment percent-encoded on its own.
    /// An id like `a/b?c` stays one segment instead of becoming a path and a query.
    fn url_for(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.url)
            .with_context(|| format!("💀 '{}' is not a URL an Elasticsearch cluster can live at", self.config.url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("💀 '{}' cannot carry a path, so it cannot carry an index either", self.config.url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        // -- 🔒 api_key is the premium tier
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("ApiKey {}", api_key));
        } else if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }
        request
    }

    /// 📝 Render a batch as NDJSON: one action line per operation, plus a source line for indexes.
    pub(crate) fn render_bulk_body(operations: &[BulkOperation]) -> Result<String> {
        let mut body = String::new();
        for operation in operations {
            let action = match operation.action {
                BulkAction::Index => "index",
                BulkAction::Delete => "delete",
            };
            let mut header = serde_json::Map::new();
            header.insert(action.to_string(), json!({ "_index": operation.index, "_id": operation.id }));
            body.push_str(&serde_json::to_string(&header).context("💀 Could not serialize a bulk action line")?);
            body.push('\n');
            if let (BulkAction::Index, Some(source)) = (operation.action, &operation.body) {
                body.push_str(&serde_json::to_string(source).context("💀 Could not serialize a bulk source line")?);
                body.push('\n');
            }
        }
        Ok(body)
    }

    /// 🔎 Pair each operation with its response item, in request order.
    fn read_bulk_response(operations: &[BulkOperation], response: BulkResponse) -> Vec<BulkItemResult> {
        operations
            .iter()
            .zip(response.items)
            .map(|(operation, item)| {
                let Some(outcome) = item.into_values().next() else {
                    return BulkItemResult::failed(&operation.type_name, &operation.id, "empty bulk response item");
                };
                let succeeded = (200..300).contains(&outcome.status)
                    // -- deleting what is already gone is still a delete
                    || (operation.action == BulkAction::Delete && outcome.status == 404);
                if succeeded {
                    BulkItemResult::ok(&operation.type_name, &operation.id)
                } else {
                    let reason = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| format!("status {}", outcome.status));
                    BulkItemResult::failed(&operation.type_name, &operation.id, reason)
                }
            })
            .collect()
    }
}

#[async_trait]
impl Store for ElasticsearchStore {
    async fn get(&self, index: &str, type_name: &str, id: &str) -> Result<Option<Document>> {
        let url = self.url_for(&[index, "_doc", id])?;
        trace!("🔎 GET {} ({})", url, type_name);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .with_context(|| format!("💀 Could not reach Elasticsearch to fetch {type_name}#{id} from '{index}'"))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .context("💀 The document response body evaporated mid-read")?;
        if !status.is_success() {
            bail!("💀 Fetching {type_name}#{id} from '{index}' failed with {status}: {body}");
        }
        let parsed: Value = serde_json::from_str(&body).context("💀 Elasticsearch returned a document that is not JSON")?;
        if parsed.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        match parsed.get("_source") {
            Some(Value::Object(source)) => Ok(Some(source.clone())),
            _ => bail!("💀 {type_name}#{id} in '{index}' came back without a _source object"),
        }
    }

    async fn submit_batch(&self, operations: &[BulkOperation]) -> Result<Vec<BulkItemResult>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let body = Self::render_bulk_body(operations)?;
        debug!("📡 Sending {} operations ({} bytes) to /_bulk", operations.len(), body.len());

        let bulk_url = self.url_for(&["_bulk"])?;
        let response = self
            .authorize(self.client.post(bulk_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts.")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("💀 The bulk request arrived, but Elasticsearch said '{}': '{}'", status, text);
        }
        let parsed: BulkResponse =
            serde_json::from_str(&text).context("💀 Elasticsearch answered the bulk request with something that is not a bulk response")?;
        if parsed.errors {
            debug!("⚠️ Bulk response reports item errors");
        }
        Ok(Self::read_bulk_response(operations, parsed))
    }

    async fn ensure_index(&self, index: &str, definition: &Value) -> Result<()> {
        let url = self.url_for(&[index])?;
        let response = self
            .authorize(self.client.put(url))
            .header("Content-Type", "application/json")
            .body(definition.to_string())
            .send()
            .await
            .with_context(|| format!("💀 Could not reach Elasticsearch to create index '{index}'"))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            info!("🏗️ Created index '{}'", index);
            return Ok(());
        }
        if text.contains("resource_already_exists_exception") {
            debug!("✅ Index '{}' already exists, leaving it alone", index);
            return Ok(());
        }
        bail!("💀 Creating index '{}' failed with {}: {}", index, status, text)
    }
}
