//! 🧱 Records, the reconstructed object graph.
//!
//! 🎬 *[a Book points at a Chapter. the Chapter points back at the Book.]*
//! *[in a language with a garbage collector, nobody would blink.]*
//! *[here, the Book and the Chapter live in an arena and point at each other by number.]*
//!
//! A [`RecordGraph`] is an arena of [`Record`]s addressed by [`RecordId`]. A field
//! that holds another record holds its id, so "the reconstructed B's back-reference
//! is the very same A" is literally `FieldValue::Record(a) == FieldValue::Record(a)`.
//! Cycles cost nothing: no `Rc`, no `Weak`, no leak, no tears.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// 🔢 Address of one record inside its graph. Only meaningful for that graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

impl RecordId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 📦 A reconstructed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Nothing here (yet). Cyclic placeholders start like this and get patched.
    Absent,
    /// Scalars, free-form objects, anything passed through as stored.
    Value(Value),
    /// Another record of the same graph.
    Record(RecordId),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_record(&self) -> Option<RecordId> {
        match self {
            FieldValue::Record(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

/// 🗂️ Field name → value, in document order.
pub type Fields = IndexMap<String, FieldValue>;

/// 🧱 One record: its type, its identity, its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub id: Option<Value>,
    pub fields: Fields,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// 💀 Why a bind call refused to touch the record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("record {0:?} does not exist in this graph")]
    UnknownRecord(RecordId),
    #[error("field '{field}' is reserved and cannot be bound")]
    ReservedField { field: String },
    #[error("field '{field}' points at record {target:?}, which does not exist in this graph")]
    DanglingRecord { field: String, target: RecordId },
}

/// Discriminator key that marks an embedded object on the wire.
pub const CLASS_KEY: &str = "class";

/// 🕸️ An arena of records with one designated root.
#[derive(Debug, Clone)]
pub struct RecordGraph {
    records: Vec<Record>,
    root: RecordId,
}

impl RecordGraph {
    /// 🌱 A fresh graph holding one empty root record.
    pub fn new(type_name: impl Into<String>, id: Option<Value>) -> Self {
        Self {
            records: vec![Record {
                type_name: type_name.into(),
                id,
                fields: Fields::new(),
            }],
            root: RecordId(0),
        }
    }

    pub fn root(&self) -> RecordId {
        self.root
    }

    pub fn root_record(&self) -> &Record {
        &self.records[self.root.0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// ➕ Allocate another empty record in this graph.
    pub fn new_record(&mut self, type_name: impl Into<String>, id: Option<Value>) -> RecordId {
        self.records.push(Record {
            type_name: type_name.into(),
            id,
            fields: Fields::new(),
        });
        RecordId(self.records.len() - 1)
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id.0)
    }

    pub fn records(&self) -> impl Iterator<Item = (RecordId, &Record)> {
        self.records.iter().enumerate().map(|(i, r)| (RecordId(i), r))
    }

    /// 🔗 Set every listed field, or none of them.
    ///
    /// Everything is checked before anything is written: the record must exist, no
    /// field may be the reserved `class` discriminator, and every record id inside
    /// the values must belong to this graph.
    pub fn bind(&mut self, id: RecordId, fields: Fields) -> Result<(), BindError> {
        if id.0 >= self.records.len() {
            return Err(BindError::UnknownRecord(id));
        }
        for (name, value) in &fields {
            if name.is_empty() || name == CLASS_KEY {
                return Err(BindError::ReservedField { field: name.clone() });
            }
            if let Some(target) = self.first_dangling(value) {
                return Err(BindError::DanglingRecord {
                    field: name.clone(),
                    target,
                });
            }
        }
        self.records[id.0].fields.extend(fields);
        Ok(())
    }

    /// ✏️ Bind a single field. Same rules as [`RecordGraph::bind`].
    pub fn set_field(&mut self, id: RecordId, name: impl Into<String>, value: impl Into<FieldValue>) -> Result<(), BindError> {
        let mut fields = Fields::new();
        fields.insert(name.into(), value.into());
        self.bind(id, fields)
    }

    fn first_dangling(&self, value: &FieldValue) -> Option<RecordId> {
        match value {
            FieldValue::Record(target) if target.0 >= self.records.len() => Some(*target),
            FieldValue::List(items) => items.iter().find_map(|item| self.first_dangling(item)),
            _ => None,
        }
    }

    /// 🔍 Structural equality of two graphs, starting at their roots.
    ///
    /// Record ids are arena positions and differ between two graphs built in a
    /// different order, so this walks both graphs in lockstep, pairing records as it
    /// goes. A pair seen before is assumed equal, which is what makes cycles finite.
    pub fn same_shape(&self, other: &RecordGraph) -> bool {
        let mut paired = HashSet::new();
        self.records_match(other, self.root, other.root, &mut paired)
    }

    fn records_match(&self, other: &RecordGraph, left: RecordId, right: RecordId, paired: &mut HashSet<(RecordId, RecordId)>) -> bool {
        if !paired.insert((left, right)) {
            return true;
        }
        let (Some(a), Some(b)) = (self.record(left), other.record(right)) else {
            return false;
        };
        a.type_name == b.type_name
            && a.id == b.id
            && a.fields.len() == b.fields.len()
            && a.fields.iter().all(|(name, value)| {
                b.fields
                    .get(name)
                    .is_some_and(|theirs| self.values_match(other, value, theirs, paired))
            })
    }

    fn values_match(&self, other: &RecordGraph, left: &FieldValue, right: &FieldValue, paired: &mut HashSet<(RecordId, RecordId)>) -> bool {
        match (left, right) {
            (FieldValue::Absent, FieldValue::Absent) => true,
            (FieldValue::Value(a), FieldValue::Value(b)) => a == b,
            (FieldValue::Record(a), FieldValue::Record(b)) => self.records_match(other, *a, *b, paired),
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values_match(other, x, y, paired))
            }
            _ => false,
        }
    }
}

impl PartialEq for RecordGraph {
    fn eq(&self, other: &Self) -> bool {
        self.same_shape(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_a_graph_is_born_with_a_root() {
        let graph = RecordGraph::new("Book", Some(json!("1")));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.root_record().type_name, "Book");
        assert!(graph.root_record().fields.is_empty());
    }

    #[test]
    fn the_one_where_bind_is_all_or_nothing() {
        let mut graph = RecordGraph::new("Book", None);
        let root = graph.root();

        let mut fields = Fields::new();
        fields.insert("title".into(), json!("X").into());
        fields.insert("class".into(), json!("Book").into());
        assert_eq!(
            graph.bind(root, fields),
            Err(BindError::ReservedField { field: "class".into() })
        );
        // 🔒 the valid "title" must not have sneaked in
        assert!(graph.root_record().fields.is_empty());

        let mut fields = Fields::new();
        fields.insert("title".into(), json!("X").into());
        fields.insert("sequel".into(), FieldValue::List(vec![FieldValue::Record(RecordId(99))]));
        assert!(matches!(graph.bind(root, fields), Err(BindError::DanglingRecord { .. })));
        assert!(graph.root_record().fields.is_empty());
    }

    #[test]
    fn the_one_where_a_cycle_is_just_two_numbers() {
        let mut graph = RecordGraph::new("Book", Some(json!("1")));
        let root = graph.root();
        let chapter = graph.new_record("Chapter", None);
        graph.set_field(chapter, "book", FieldValue::Record(root)).expect("bind");
        graph.set_field(root, "chapter", FieldValue::Record(chapter)).expect("bind");

        let back = graph
            .record(chapter)
            .and_then(|c| c.field("book"))
            .and_then(FieldValue::as_record);
        assert_eq!(back, Some(root));
    }

    #[test]
    fn the_one_where_shape_ignores_arena_order_but_not_content() {
        let mut left = RecordGraph::new("Book", Some(json!("1")));
        let l_root = left.root();
        let l_unused = left.new_record("Chapter", None);
        let l_chapter = left.new_record("Chapter", None);
        left.set_field(l_chapter, "book", FieldValue::Record(l_root)).expect("bind");
        left.set_field(l_root, "chapter", FieldValue::Record(l_chapter)).expect("bind");
        let _ = l_unused;

        let mut right = RecordGraph::new("Book", Some(json!("1")));
        let r_root = right.root();
        let r_chapter = right.new_record("Chapter", None);
        right.set_field(r_root, "chapter", FieldValue::Record(r_chapter)).expect("bind");
        right.set_field(r_chapter, "book", FieldValue::Record(r_root)).expect("bind");

        assert_eq!(left, right);

        right.set_field(r_chapter, "heading", json!("Intro")).expect("bind");
        assert_ne!(left, right);
    }
}
