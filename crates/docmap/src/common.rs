//! 📦 Common data structures — the little structs that ferry identities and payloads
//! between the write queue and the store.
//!
//! 🎬 COLD OPEN — INT. WRITE QUEUE — 3:47 AM
//!
//! Somewhere, a record changed. Somebody called `enqueue_index`. The record was
//! turned into a [`Document`], stamped with an [`EntityKey`], and dropped into a
//! map where it waits, patiently, for a flush. It does not know if it will be
//! indexed on the first try. Nobody does. That's what the retry loop is for.
//!
//! 🦆

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 📄 A flat indexed document: string keys to scalars, mappings and sequences.
/// Exactly what comes back in `_source`. Exactly what goes out in a bulk body.
pub type Document = Map<String, Value>;

/// 🔑 The identity of one record for queueing and deduplication.
///
/// `type_name` is the *record* type as the schema knows it (`"Book"`), not the
/// store-side type name (`"book"`). `id` is the stringified identity, because the
/// store only ever speaks strings and we are polite guests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub type_name: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

/// ✍️ One pending write. Index carries the already-serialized payload; delete
/// only needs to know who is leaving.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Index { key: EntityKey, document: Document },
    Delete { key: EntityKey },
}

impl PendingWrite {
    pub fn key(&self) -> &EntityKey {
        match self {
            PendingWrite::Index { key, .. } | PendingWrite::Delete { key } => key,
        }
    }
}

/// 🎬 The two things a bulk request can ask the store to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Index,
    Delete,
}

/// 📡 One operation inside a batched write request, already addressed in store terms.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub index: String,
    pub type_name: String,
    pub id: String,
    /// Only index operations carry a body. Deletes travel light.
    pub body: Option<Document>,
}

impl BulkOperation {
    pub fn index(index: impl Into<String>, type_name: impl Into<String>, id: impl Into<String>, body: Document) -> Self {
        Self {
            action: BulkAction::Index,
            index: index.into(),
            type_name: type_name.into(),
            id: id.into(),
            body: Some(body),
        }
    }

    pub fn delete(index: impl Into<String>, type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            action: BulkAction::Delete,
            index: index.into(),
            type_name: type_name.into(),
            id: id.into(),
            body: None,
        }
    }
}

/// ✅ or 💀, the store's verdict on one bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    pub type_name: String,
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(type_name: impl Into<String>, id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// 🔎 A search hit as the store hands it back: where it lives, who it is, what it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub index: String,
    pub type_name: String,
    pub id: String,
    pub source: Document,
}
