//! 🔄 The Document Unmarshaller — flat stored documents back into record graphs.
//!
//! 🎬 COLD OPEN — INT. SEARCH RESULTS PAGE — NIGHT
//!
//! A document comes back from the store. It looks innocent: a title, some tags, an
//! `{"id": 7}` where an author used to be, and a suspicious `{"ref": "../../.."}` deep
//! inside a chapter. Our job is to turn it back into the records it came from, with
//! the author fetched live and the chapter pointing at the very same book it lives in.
//!
//! 🧠 Knowledge graph:
//! - Build pass: walk the document field by field ([`Unmarshaller::reconstruct`]),
//!   recursing into components, fetching references from the [`Store`], and leaving a
//!   hole plus a [`context::CycleRef`] wherever a cyclic marker shows up.
//! - Patch pass: [`cycles`] fills the holes once the whole tree exists.
//! - Bind: the top-level record's fields are bound last, all at once.
//! - Path bookkeeping lives in [`context`] and [`path`]; the error taxonomy in [`error`].
//!
//! ⚠️ One reconstruction = one context. Calls may run concurrently; contexts never meet.

pub mod context;
pub(crate) mod cycles;
pub mod error;
pub mod path;

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::backends::{Store, StoreBackend};
use crate::common::{Document, SearchHit};
use crate::records::{CLASS_KEY, FieldValue, Fields, RecordGraph, RecordId};
use crate::schema::{FieldKind, FieldMapping, MappingSchema, TypeMapping, identity_string};

pub use context::{CycleRef, UnmarshallingContext};
pub use error::UnmarshallError;
pub use path::{FieldPath, Segment};

/// 🔁 Key that marks a cyclic back-pointer on the wire.
pub const CYCLE_REF_KEY: &str = "ref";

/// Key under which a reference carries its target's identity.
pub const REFERENCE_ID_KEY: &str = "id";

pub struct Unmarshaller<S: Store = StoreBackend> {
    schema: Arc<MappingSchema>,
    store: Arc<S>,
}

impl<S: Store> Clone for Unmarshaller<S> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> std::fmt::Debug for Unmarshaller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unmarshaller").field("store", &self.store).finish_non_exhaustive()
    }
}

impl<S: Store> Unmarshaller<S> {
    pub fn new(schema: Arc<MappingSchema>, store: Arc<S>) -> Self {
        Self { schema, store }
    }

    pub fn schema(&self) -> &MappingSchema {
        &self.schema
    }

    /// 🔄 Rebuild one top-level record from its stored document.
    ///
    /// `identity` is converted to the type's identity type. References are fetched from
    /// the store as they are met, so this is async and can fail on I/O.
    pub async fn reconstruct(&self, type_name: &str, identity: &Value, document: &Document) -> Result<RecordGraph, UnmarshallError> {
        let type_mapping = self.schema.type_mapping(type_name).ok_or_else(|| UnmarshallError::UnknownType {
            type_name: type_name.to_string(),
            path: FieldPath::root(),
        })?;
        let id = convert_identity(type_mapping, identity, &FieldPath::root())?;
        trace!("🔄 reconstructing {}#{}", type_name, identity_string(&id));

        let mut graph = RecordGraph::new(type_name, Some(id));
        let mut ctx = UnmarshallingContext::new();
        let mut top = self.unmarshall_fields(&mut graph, &mut ctx, type_mapping, document).await?;

        let patches = ctx.take_cycle_refs()?;
        if !patches.is_empty() {
            debug!("🔁 {} cyclic reference(s) to patch in {}", patches.len(), type_name);
        }
        cycles::apply_patches(&mut graph, &mut top, patches)?;

        let root = graph.root();
        graph.bind(root, top)?;
        Ok(graph)
    }

    /// 📚 Rebuild a page of search hits. Hits of unknown types are skipped with a warning.
    pub async fn build_results(&self, hits: &[SearchHit]) -> Result<Vec<RecordGraph>, UnmarshallError> {
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(type_mapping) = self.schema.find_by_hit(&hit.index, &hit.type_name) else {
                warn!("⚠️ Unknown search hit {}#{} in index '{}', skipping", hit.id, hit.type_name, hit.index);
                continue;
            };
            let identity = Value::String(hit.id.clone());
            results.push(self.reconstruct(&type_mapping.name, &identity, &hit.source).await?);
        }
        Ok(results)
    }

    /// 🔎 Fetch one record from the store and rebuild it. `Ok(None)` when it is not there.
    pub async fn load(&self, type_name: &str, id: &str) -> Result<Option<RecordGraph>, UnmarshallError> {
        let type_mapping = self.schema.type_mapping(type_name).ok_or_else(|| UnmarshallError::UnknownType {
            type_name: type_name.to_string(),
            path: FieldPath::root(),
        })?;
        let document = self
            .store
            .get(&type_mapping.index_name, &type_mapping.store_type_name, id)
            .await
            .map_err(|e| UnmarshallError::Store {
                type_name: type_name.to_string(),
                id: id.to_string(),
                source: e.into(),
            })?;
        match document {
            Some(document) => Ok(Some(self.reconstruct(type_name, &Value::String(id.to_string()), &document).await?)),
            None => Ok(None),
        }
    }

    /// Every field of one stored record, except its identity and discriminator.
    async fn unmarshall_fields(
        &self,
        graph: &mut RecordGraph,
        ctx: &mut UnmarshallingContext,
        type_mapping: &TypeMapping,
        document: &Map<String, Value>,
    ) -> Result<Fields, UnmarshallError> {
        let mut fields = Fields::new();
        for (name, raw) in document {
            if name == CLASS_KEY || name == &type_mapping.identity_field {
                continue;
            }
            let Some(mapping) = type_mapping.field(name) else {
                warn!(
                    "⚠️ {}.{} is in the index but not in the mapping, passing it through as stored",
                    type_mapping.name, name
                );
                fields.insert(name.clone(), FieldValue::Value(raw.clone()));
                continue;
            };
            ctx.push(Segment::Field(name.clone()));
            let value = self.unmarshall_value(graph, ctx, type_mapping, name, mapping, raw).await?;
            ctx.pop();
            fields.insert(name.clone(), value);
        }
        Ok(fields)
    }

    /// 🧩 One value of one mapped field. Sequences come back through here once per element.
    fn unmarshall_value<'a>(
        &'a self,
        graph: &'a mut RecordGraph,
        ctx: &'a mut UnmarshallingContext,
        owner: &'a TypeMapping,
        field_name: &'a str,
        mapping: &'a FieldMapping,
        raw: &'a Value,
    ) -> BoxFuture<'a, Result<FieldValue, UnmarshallError>> {
        async move {
            match raw {
                Value::Object(data) => {
                    // -- the marker goes first, or a cyclic reference would fetch itself forever
                    if let Some(marker) = data.get(CYCLE_REF_KEY) {
                        ctx.add_cycle_ref(marker).map_err(|_| UnmarshallError::UnresolvedCycle {
                            at: ctx.current_path().clone(),
                            target: FieldPath::parse(marker.as_str().unwrap_or_default()),
                        })?;
                        return Ok(FieldValue::Absent);
                    }
                    match &mapping.kind {
                        FieldKind::Reference { target } => {
                            let id = data.get(REFERENCE_ID_KEY).ok_or_else(|| UnmarshallError::Integrity {
                                record_type: owner.name.clone(),
                                field: field_name.to_string(),
                                path: ctx.current_path().clone(),
                                reason: "reference without an id".to_string(),
                            })?;
                            let record = self.unmarshall_reference(graph, ctx, target, id).await?;
                            Ok(FieldValue::Record(record))
                        }
                        FieldKind::Component { target } => {
                            let embedded = data.get(CLASS_KEY).and_then(Value::as_str).unwrap_or(target);
                            let record = self.unmarshall_component(graph, ctx, embedded, data).await?;
                            Ok(FieldValue::Record(record))
                        }
                        FieldKind::Plain if data.contains_key(CLASS_KEY) => Err(UnmarshallError::SchemaMismatch {
                            record_type: owner.name.clone(),
                            field: field_name.to_string(),
                            path: ctx.current_path().clone(),
                            reason: "embedded object found, but the field is not mapped as a component".to_string(),
                        }),
                        FieldKind::Plain => Ok(FieldValue::Value(raw.clone())),
                    }
                }
                Value::Array(items) => {
                    let mut rebuilt = Vec::with_capacity(items.len());
                    let mut layout = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        ctx.push(Segment::Index(index));
                        let value = self
                            .unmarshall_value(&mut *graph, &mut *ctx, owner, field_name, mapping, item)
                            .await?;
                        ctx.pop();
                        // -- cyclic elements come back through the patch pass, at the end
                        if value.is_absent() {
                            layout.push(None);
                        } else {
                            layout.push(Some(rebuilt.len()));
                            rebuilt.push(value);
                        }
                    }
                    ctx.record_list_layout(layout);
                    Ok(FieldValue::List(rebuilt))
                }
                Value::Null => Ok(FieldValue::Value(Value::Null)),
                scalar => self.unmarshall_scalar(ctx, owner, field_name, mapping, scalar),
            }
        }
        .boxed()
    }

    fn unmarshall_scalar(
        &self,
        ctx: &UnmarshallingContext,
        owner: &TypeMapping,
        field_name: &str,
        mapping: &FieldMapping,
        scalar: &Value,
    ) -> Result<FieldValue, UnmarshallError> {
        if let Some(converter_name) = &mapping.converter {
            let converter = self.schema.converter(converter_name).ok_or_else(|| UnmarshallError::Conversion {
                record_type: owner.name.clone(),
                field: field_name.to_string(),
                converter: converter_name.clone(),
                reason: "converter is not registered".to_string(),
            })?;
            let text = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return converter
                .convert(&text)
                .map(FieldValue::Value)
                .map_err(|reason| UnmarshallError::Conversion {
                    record_type: owner.name.clone(),
                    field: field_name.to_string(),
                    converter: converter_name.clone(),
                    reason,
                });
        }
        if mapping.is_reference() {
            return Err(UnmarshallError::Integrity {
                record_type: owner.name.clone(),
                field: field_name.to_string(),
                path: ctx.current_path().clone(),
                reason: format!("found a reference which is not an object: {scalar}"),
            });
        }
        Ok(FieldValue::Value(scalar.clone()))
    }

    /// 🧱 An embedded record, rebuilt in place from the object that carries it.
    async fn unmarshall_component(
        &self,
        graph: &mut RecordGraph,
        ctx: &mut UnmarshallingContext,
        type_name: &str,
        data: &Map<String, Value>,
    ) -> Result<RecordId, UnmarshallError> {
        let type_mapping = self.schema.type_mapping(type_name).ok_or_else(|| UnmarshallError::UnknownType {
            type_name: type_name.to_string(),
            path: ctx.current_path().clone(),
        })?;
        let id = match data.get(&type_mapping.identity_field) {
            Some(raw) if !raw.is_null() => Some(convert_identity(type_mapping, raw, ctx.current_path())?),
            _ => None,
        };
        let record = graph.new_record(type_name, id);
        let fields = self.unmarshall_fields(graph, ctx, type_mapping, data).await?;
        graph.bind(record, fields)?;
        Ok(record)
    }

    /// 🔗 A referenced record, fetched live and rebuilt at the current path.
    async fn unmarshall_reference(
        &self,
        graph: &mut RecordGraph,
        ctx: &mut UnmarshallingContext,
        type_name: &str,
        raw_id: &Value,
    ) -> Result<RecordId, UnmarshallError> {
        let type_mapping = self.schema.type_mapping(type_name).ok_or_else(|| UnmarshallError::UnknownType {
            type_name: type_name.to_string(),
            path: ctx.current_path().clone(),
        })?;
        let id = convert_identity(type_mapping, raw_id, ctx.current_path())?;
        let id_text = identity_string(&id);
        trace!("🔗 fetching {}#{} for '{}'", type_name, id_text, ctx.current_path());

        let document = self
            .store
            .get(&type_mapping.index_name, &type_mapping.store_type_name, &id_text)
            .await
            .map_err(|e| UnmarshallError::Store {
                type_name: type_name.to_string(),
                id: id_text.clone(),
                source: e.into(),
            })?
            .ok_or_else(|| UnmarshallError::DanglingReference {
                type_name: type_name.to_string(),
                id: id_text.clone(),
                path: ctx.current_path().clone(),
            })?;

        let record = graph.new_record(type_name, Some(id));
        // 🚪 its `ref` paths were written from its own top, which is right here
        let outer = ctx.enter_document();
        let fields = self.unmarshall_fields(graph, ctx, type_mapping, &document).await;
        ctx.leave_document(outer);
        graph.bind(record, fields?)?;
        Ok(record)
    }
}

fn convert_identity(type_mapping: &TypeMapping, raw: &Value, path: &FieldPath) -> Result<Value, UnmarshallError> {
    type_mapping
        .identity_type
        .convert(raw)
        .map_err(|reason| UnmarshallError::InvalidIdentity {
            type_name: type_mapping.name.clone(),
            path: path.clone(),
            reason,
        })
}
