//! ✍️ The Marshaller turns record graphs into flat stored documents.
//!
//! The inverse of the unmarshaller, and the thing that gives the wire format its shape:
//!
//! ```text
//! component  → {"class": "Chapter", "id": .., ..fields}
//! reference  → {"id": 7}
//! seen again → {"ref": "chapters/0"}      (absolute path of its first appearance)
//! converted  → "412"                       (the converter's text form)
//! ```
//!
//! A component record that was already written earlier in the same document becomes a
//! cyclic marker instead of being written twice. That is what keeps cycles finite and
//! makes the unmarshaller hand back the very same record on the way in.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};

use crate::common::Document;
use crate::records::{CLASS_KEY, FieldValue, RecordGraph, RecordId};
use crate::schema::{FieldKind, FieldMapping, MappingSchema, TypeMapping};
use crate::unmarshall::path::{FieldPath, Segment};
use crate::unmarshall::{CYCLE_REF_KEY, REFERENCE_ID_KEY};

/// 🔎 Anything the write queue can index: it knows its type, its identity and its document.
pub trait Searchable {
    fn type_name(&self) -> &str;
    fn identity(&self) -> Option<&Value>;
    fn to_document(&self, schema: &MappingSchema) -> Result<Document>;
}

impl Searchable for RecordGraph {
    fn type_name(&self) -> &str {
        &self.root_record().type_name
    }

    fn identity(&self) -> Option<&Value> {
        self.root_record().id.as_ref()
    }

    fn to_document(&self, schema: &MappingSchema) -> Result<Document> {
        marshall(schema, self)
    }
}

/// 📄 An entity that already is a document, e.g. a line of an NDJSON ingest file.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEntity {
    pub type_name: String,
    pub id: Value,
    pub document: Document,
}

impl Searchable for DocumentEntity {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn identity(&self) -> Option<&Value> {
        Some(&self.id)
    }

    fn to_document(&self, _schema: &MappingSchema) -> Result<Document> {
        Ok(self.document.clone())
    }
}

/// ✍️ Flatten a graph, starting at its root, into the document the store will hold.
/// The root's identity is not part of the document; the store keeps it as the document id.
pub fn marshall(schema: &MappingSchema, graph: &RecordGraph) -> Result<Document> {
    let mut marshaller = Marshaller {
        schema,
        graph,
        written: HashMap::new(),
    };
    let mut path = FieldPath::root();
    marshaller.written.insert(graph.root(), path.clone());
    marshaller.record_fields(graph.root(), &mut path)
}

struct Marshaller<'a> {
    schema: &'a MappingSchema,
    graph: &'a RecordGraph,
    /// Components already written, and where.
    written: HashMap<RecordId, FieldPath>,
}

impl<'a> Marshaller<'a> {
    fn type_mapping(&self, type_name: &str) -> Result<&'a TypeMapping> {
        self.schema
            .type_mapping(type_name)
            .with_context(|| format!("💀 '{type_name}' is not a mapped type, it cannot be marshalled"))
    }

    fn record_fields(&mut self, id: RecordId, path: &mut FieldPath) -> Result<Map<String, Value>> {
        let record = self
            .graph
            .record(id)
            .with_context(|| format!("💀 record {id:?} is not part of this graph"))?;
        let type_mapping = self.type_mapping(&record.type_name)?;

        let mut document = Map::new();
        for (name, value) in &record.fields {
            if value.is_absent() {
                continue;
            }
            path.push(Segment::Field(name.clone()));
            let marshalled = self.value(type_mapping, name, type_mapping.field(name), value, path)?;
            path.pop();
            document.insert(name.clone(), marshalled);
        }
        Ok(document)
    }

    fn value(
        &mut self,
        owner: &TypeMapping,
        field_name: &str,
        mapping: Option<&FieldMapping>,
        value: &FieldValue,
        path: &mut FieldPath,
    ) -> Result<Value> {
        match value {
            FieldValue::Absent => Ok(Value::Null),
            FieldValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(Segment::Index(index));
                    out.push(self.value(owner, field_name, mapping, item, path)?);
                    path.pop();
                }
                Ok(Value::Array(out))
            }
            FieldValue::Value(raw) => match mapping.and_then(|m| m.converter.as_deref()) {
                Some(converter_name) if !raw.is_null() => {
                    let converter = self
                        .schema
                        .converter(converter_name)
                        .with_context(|| format!("💀 converter '{converter_name}' is not registered"))?;
                    match converter.render(raw) {
                        Ok(text) => Ok(Value::String(text)),
                        Err(reason) => bail!(
                            "💀 Unable to marshall {}.{} using converter '{}': {}",
                            owner.name,
                            field_name,
                            converter_name,
                            reason
                        ),
                    }
                }
                _ => Ok(raw.clone()),
            },
            FieldValue::Record(target) => match mapping.map(|m| &m.kind) {
                Some(FieldKind::Reference { .. }) => self.reference(*target, owner, field_name),
                Some(FieldKind::Component { .. }) => self.component(*target, path),
                _ => bail!(
                    "💀 {}.{} holds a record but is mapped as neither component nor reference",
                    owner.name,
                    field_name
                ),
            },
        }
    }

    fn reference(&self, target: RecordId, owner: &TypeMapping, field_name: &str) -> Result<Value> {
        let id = self
            .graph
            .record(target)
            .and_then(|r| r.id.clone())
            .with_context(|| format!("💀 {}.{} references a record without an identity", owner.name, field_name))?;
        Ok(json!({ REFERENCE_ID_KEY: id }))
    }

    fn component(&mut self, target: RecordId, path: &mut FieldPath) -> Result<Value> {
        if let Some(first_seen) = self.written.get(&target) {
            return Ok(json!({ CYCLE_REF_KEY: first_seen.to_string() }));
        }
        self.written.insert(target, path.clone());

        let record = self
            .graph
            .record(target)
            .with_context(|| format!("💀 record {target:?} is not part of this graph"))?;
        let type_mapping = self.type_mapping(&record.type_name)?;
        let mut document = Map::new();
        document.insert(CLASS_KEY.to_string(), Value::String(record.type_name.clone()));
        if let Some(id) = &record.id {
            document.insert(type_mapping.identity_field.clone(), id.clone());
        }
        document.extend(self.record_fields(target, path)?);
        Ok(Value::Object(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::library_schema;

    /// 📚 A book with an author reference, two chapters that point back, and a page count.
    fn dune() -> RecordGraph {
        let mut graph = RecordGraph::new("Book", Some(json!("1")));
        let root = graph.root();
        let author = graph.new_record("Author", Some(json!(7)));
        graph.set_field(author, "name", json!("Frank")).expect("bind");
        let one = graph.new_record("Chapter", None);
        let two = graph.new_record("Chapter", None);
        graph.set_field(one, "heading", json!("One")).expect("bind");
        graph.set_field(one, "book", FieldValue::Record(root)).expect("bind");
        graph.set_field(two, "heading", json!("Two")).expect("bind");
        graph.set_field(two, "book", FieldValue::Record(root)).expect("bind");
        graph.set_field(root, "title", json!("Dune")).expect("bind");
        graph.set_field(root, "pages", json!(412)).expect("bind");
        graph.set_field(root, "author", FieldValue::Record(author)).expect("bind");
        graph
            .set_field(root, "chapters", FieldValue::List(vec![FieldValue::Record(one), FieldValue::Record(two)]))
            .expect("bind");
        graph
    }

    #[test]
    fn the_one_where_the_wire_shape_has_classes_ids_and_refs() -> Result<()> {
        let document = marshall(&library_schema(), &dune())?;
        assert_eq!(
            Value::Object(document),
            json!({
                "title": "Dune",
                "pages": "412",
                "author": {"id": 7},
                "chapters": [
                    {"class": "Chapter", "heading": "One", "book": {"ref": ""}},
                    {"class": "Chapter", "heading": "Two", "book": {"ref": ""}}
                ]
            })
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_shared_component_is_written_once() -> Result<()> {
        let mut graph = RecordGraph::new("Book", Some(json!("1")));
        let root = graph.root();
        let chapter = graph.new_record("Chapter", Some(json!("c1")));
        graph.set_field(chapter, "heading", json!("Only")).expect("bind");
        graph
            .set_field(root, "chapters", FieldValue::List(vec![FieldValue::Record(chapter), FieldValue::Record(chapter)]))
            .expect("bind");

        let document = marshall(&library_schema(), &graph)?;
        assert_eq!(
            document.get("chapters"),
            Some(&json!([
                {"class": "Chapter", "id": "c1", "heading": "Only"},
                {"ref": "chapters/0"}
            ]))
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_record_in_a_plain_field_is_refused() {
        let mut graph = RecordGraph::new("Book", Some(json!("1")));
        let root = graph.root();
        let stray = graph.new_record("Chapter", None);
        graph.set_field(root, "title", FieldValue::Record(stray)).expect("bind");
        assert!(marshall(&library_schema(), &graph).is_err());
    }

    #[test]
    fn the_one_where_graphs_know_what_they_are() {
        let graph = dune();
        assert_eq!(graph.type_name(), "Book");
        assert_eq!(graph.identity(), Some(&json!("1")));
    }

    #[tokio::test]
    async fn the_one_where_a_book_survives_the_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        use crate::backends::{InMemoryStore, Store};
        use crate::common::BulkOperation;
        use crate::unmarshall::Unmarshaller;
        use std::sync::Arc;

        let schema = Arc::new(library_schema());
        let store = InMemoryStore::new();
        let original = dune();

        // 📦 the author lives in its own document, the book refers to it by id
        let mut author_doc = Document::new();
        author_doc.insert("name".into(), json!("Frank"));
        store
            .submit_batch(&[BulkOperation::index("library", "author", "7", author_doc)])
            .await?;

        let document = marshall(&schema, &original)?;
        let unmarshaller = Unmarshaller::new(Arc::clone(&schema), Arc::new(store));
        let rebuilt = unmarshaller.reconstruct("Book", &json!("1"), &document).await?;

        assert_eq!(rebuilt, original);
        Ok(())
    }
}
