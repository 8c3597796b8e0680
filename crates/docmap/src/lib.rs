//! 🗺️ docmap — records in, documents out, and back again.
//!
//! 🎬 *[a record graph, cycles and all, gets flattened into a search document.]*
//! *[later, the document comes back. and so does every back-pointer.]*
//!
//! 🧠 Knowledge graph:
//! - [`schema`]: which types are searchable and how each field is stored
//! - [`marshall`] / [`unmarshall`]: record graph ⇄ document, `ref` markers for cycles
//! - [`queue`]: deduplicated, retried index/delete writes
//! - [`backends`]: the store boundary (Elasticsearch, in-memory)
//! - [`workers`]: the background flusher
//! - [`mapper`]: [`DocMapper`] wires all of the above from an [`AppConfig`]

pub mod app_config;
pub mod backends;
pub mod common;
pub mod converters;
pub mod mapper;
pub mod marshall;
pub mod queue;
pub mod records;
pub mod schema;
pub mod unmarshall;
pub mod workers;

pub use app_config::{AppConfig, QueueConfig, load_config};
pub use mapper::DocMapper;
