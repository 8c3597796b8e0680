//! 🔁 The patch pass, second half of every reconstruction.
//!
//! 🎬 *[the build pass left little holes wherever the document said "see above".]*
//! *[the patch pass walks back through the finished tree and fills them in.]*
//!
//! Each [`CycleRef`] names where the hole is (`at`) and what should go there
//! (`target`). Targets resolve against the *built* tree, not the stored document:
//! numeric segments index sequences, the rest look up fields, the empty path is the
//! top-level record. Both paths arrive already rewritten to built positions. A trailing
//! field segment in `at` fills the hole left in that field; a trailing numeric segment
//! appends to the sequence (the element was dropped from it during the build).
//!
//! A target can itself sit behind a hole that a later patch fills, so patches are
//! applied until nothing moves. Whatever is still pending then is an error.
//!
//! 🧠 The top-level record's fields live in `top` until the final bind, so every
//! lookup of the root record goes there instead of the arena.

use tracing::trace;

use super::context::CycleRef;
use super::error::UnmarshallError;
use super::path::{FieldPath, Segment};
use crate::records::{FieldValue, Fields, RecordGraph, RecordId};

/// 📍 Where a walk stopped: on a record, or on a value inside some record's field.
#[derive(Debug, Clone)]
enum Cursor {
    Record(RecordId),
    Slot(Slot),
}

/// A field of a record, then zero or more positions into nested sequences.
#[derive(Debug, Clone)]
struct Slot {
    record: RecordId,
    field: String,
    indices: Vec<usize>,
}

/// 🔁 Apply every deferred patch, or fail with the first one that cannot land.
pub(crate) fn apply_patches(graph: &mut RecordGraph, top: &mut Fields, patches: Vec<CycleRef>) -> Result<(), UnmarshallError> {
    let mut pending = patches;
    while !pending.is_empty() {
        let before = pending.len();
        let mut still_pending = Vec::new();
        for patch in pending {
            match resolve(graph, top, &patch.target) {
                Some(value) => {
                    trace!("🔁 patching '{}' with '{}'", patch.at, patch.target);
                    write(graph, top, &patch, value)?;
                }
                None => still_pending.push(patch),
            }
        }
        if still_pending.len() == before {
            let stuck = &still_pending[0];
            return Err(UnmarshallError::UnresolvedCycle {
                at: stuck.at.clone(),
                target: stuck.target.clone(),
            });
        }
        pending = still_pending;
    }
    Ok(())
}

fn fields_of<'a>(graph: &'a RecordGraph, top: &'a Fields, id: RecordId) -> Option<&'a Fields> {
    if id == graph.root() {
        Some(top)
    } else {
        graph.record(id).map(|r| &r.fields)
    }
}

fn fields_of_mut<'a>(graph: &'a mut RecordGraph, top: &'a mut Fields, id: RecordId) -> Option<&'a mut Fields> {
    if id == graph.root() {
        Some(top)
    } else {
        graph.record_mut(id).map(|r| &mut r.fields)
    }
}

fn value_at<'a>(graph: &'a RecordGraph, top: &'a Fields, slot: &Slot) -> Option<&'a FieldValue> {
    let mut value = fields_of(graph, top, slot.record)?.get(&slot.field)?;
    for &index in &slot.indices {
        value = value.as_list()?.get(index)?;
    }
    Some(value)
}

fn value_at_mut<'a>(graph: &'a mut RecordGraph, top: &'a mut Fields, slot: &Slot) -> Option<&'a mut FieldValue> {
    let mut value = fields_of_mut(graph, top, slot.record)?.get_mut(&slot.field)?;
    for &index in &slot.indices {
        value = match value {
            FieldValue::List(items) => items.get_mut(index)?,
            _ => return None,
        };
    }
    Some(value)
}

/// 🚶 Walk a path through the built tree without touching it.
fn locate(graph: &RecordGraph, top: &Fields, path: &FieldPath) -> Option<Cursor> {
    let mut cursor = Cursor::Record(graph.root());
    for segment in path.segments() {
        cursor = match (cursor, segment) {
            (Cursor::Record(record), Segment::Field(name)) => {
                fields_of(graph, top, record)?.get(name)?;
                Cursor::Slot(Slot {
                    record,
                    field: name.clone(),
                    indices: Vec::new(),
                })
            }
            (Cursor::Slot(slot), Segment::Field(name)) => {
                // -- stepping into a field means the slot must hold a record
                let record = value_at(graph, top, &slot)?.as_record()?;
                fields_of(graph, top, record)?.get(name)?;
                Cursor::Slot(Slot {
                    record,
                    field: name.clone(),
                    indices: Vec::new(),
                })
            }
            (Cursor::Slot(mut slot), Segment::Index(index)) => {
                value_at(graph, top, &slot)?.as_list()?.get(*index)?;
                slot.indices.push(*index);
                Cursor::Slot(slot)
            }
            (Cursor::Record(_), Segment::Index(_)) => return None,
        };
    }
    Some(cursor)
}

/// The value a target path stands for, if it has materialised yet.
fn resolve(graph: &RecordGraph, top: &Fields, target: &FieldPath) -> Option<FieldValue> {
    match locate(graph, top, target)? {
        Cursor::Record(record) => Some(FieldValue::Record(record)),
        Cursor::Slot(slot) => match value_at(graph, top, &slot)? {
            FieldValue::Absent => None,
            value => Some(value.clone()),
        },
    }
}

fn write(graph: &mut RecordGraph, top: &mut Fields, patch: &CycleRef, value: FieldValue) -> Result<(), UnmarshallError> {
    let unresolved = || UnmarshallError::UnresolvedCycle {
        at: patch.at.clone(),
        target: patch.target.clone(),
    };
    let mut parent = patch.at.clone();
    let last = parent.pop().ok_or_else(unresolved)?;
    let cursor = locate(graph, top, &parent).ok_or_else(unresolved)?;

    match last {
        Segment::Field(name) => {
            let record = match cursor {
                Cursor::Record(record) => record,
                Cursor::Slot(slot) => value_at(graph, top, &slot)
                    .and_then(FieldValue::as_record)
                    .ok_or_else(unresolved)?,
            };
            // 🕳️ only a hole the build pass left may be filled, never a brand new field
            match fields_of_mut(graph, top, record).and_then(|fields| fields.get_mut(&name)) {
                Some(hole) if hole.is_absent() => *hole = value,
                _ => return Err(unresolved()),
            }
        }
        Segment::Index(_) => {
            let Cursor::Slot(slot) = cursor else {
                return Err(unresolved());
            };
            match value_at_mut(graph, top, &slot) {
                Some(FieldValue::List(items)) => items.push(value),
                _ => return Err(unresolved()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cycle(at: &str, target: &str) -> CycleRef {
        CycleRef {
            at: FieldPath::parse(at),
            target: FieldPath::parse(target),
        }
    }

    #[test]
    fn the_one_where_the_empty_target_is_the_top_level_record() -> Result<(), UnmarshallError> {
        let mut graph = RecordGraph::new("Book", Some(json!("1")));
        let chapter = graph.new_record("Chapter", None);
        graph.set_field(chapter, "book", FieldValue::Absent)?;
        let mut top = Fields::new();
        top.insert("chapters".into(), FieldValue::List(vec![FieldValue::Record(chapter)]));

        apply_patches(&mut graph, &mut top, vec![cycle("chapters/0/book", "")])?;

        let back = graph.record(chapter).and_then(|c| c.field("book")).and_then(FieldValue::as_record);
        assert_eq!(back, Some(graph.root()));
        Ok(())
    }

    #[test]
    fn the_one_where_a_trailing_index_appends() -> Result<(), UnmarshallError> {
        let mut graph = RecordGraph::new("Book", None);
        let mut top = Fields::new();
        top.insert("title".into(), json!("Dune").into());
        top.insert("related".into(), FieldValue::List(vec![json!("x").into()]));

        apply_patches(&mut graph, &mut top, vec![cycle("related/0", "")])?;

        let related = top.get("related").and_then(FieldValue::as_list).map(|l| l.to_vec());
        assert_eq!(
            related,
            Some(vec![json!("x").into(), FieldValue::Record(graph.root())])
        );
        Ok(())
    }

    #[test]
    fn the_one_where_one_patch_waits_for_another() -> Result<(), UnmarshallError> {
        let mut graph = RecordGraph::new("Book", None);
        let chapter = graph.new_record("Chapter", None);
        graph.set_field(chapter, "book", FieldValue::Absent)?;
        let mut top = Fields::new();
        top.insert("chapter".into(), FieldValue::Record(chapter));
        top.insert("same".into(), FieldValue::Absent);

        // ⏳ "same" points at "chapter/book", which only exists after the second patch
        apply_patches(
            &mut graph,
            &mut top,
            vec![cycle("same", "chapter/book"), cycle("chapter/book", "")],
        )?;

        assert_eq!(top.get("same"), Some(&FieldValue::Record(graph.root())));
        Ok(())
    }

    #[test]
    fn the_one_where_a_target_that_never_shows_up_is_an_error() {
        let mut graph = RecordGraph::new("Book", None);
        let mut top = Fields::new();
        top.insert("sequel".into(), FieldValue::Absent);

        let result = apply_patches(&mut graph, &mut top, vec![cycle("sequel", "prequel/0")]);
        assert!(matches!(result, Err(UnmarshallError::UnresolvedCycle { .. })));
    }

    #[test]
    fn the_one_where_a_patch_cannot_invent_a_field() {
        let mut graph = RecordGraph::new("Book", None);
        let mut top = Fields::new();
        top.insert("title".into(), json!("Dune").into());

        // -- "book" was never a hole on the top-level record
        let result = apply_patches(&mut graph, &mut top, vec![cycle("book", "")]);
        assert!(matches!(result, Err(UnmarshallError::UnresolvedCycle { .. })));
        assert!(!top.contains_key("book"));

        // -- and a field that already holds something is not a hole either
        let result = apply_patches(&mut graph, &mut top, vec![cycle("title", "")]);
        assert!(matches!(result, Err(UnmarshallError::UnresolvedCycle { .. })));
        assert_eq!(top.get("title"), Some(&FieldValue::Value(json!("Dune"))));
    }
}
