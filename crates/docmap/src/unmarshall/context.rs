//! 🧳 The unmarshalling context: the luggage one reconstruction carries around.
//!
//! A path stack (where are we right now?) and a list of deferred cyclic patches
//! (who still needs to be pointed at whom?). One context per top-level document.
//! Born with the call, dropped with the call. Never shared, never reused.
//!
//! 🧠 Paths are collected with positions *as stored*. Cyclic list elements are left
//! out of the built lists, so every list that lost one remembers its layout, and
//! [`UnmarshallingContext::take_cycle_refs`] rewrites each patch to built positions.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::error::UnmarshallError;
use super::path::{FieldPath, Segment};

/// 🔁 A back-pointer found during the build pass, resolved in the patch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRef {
    /// Where the placeholder sits (and where the resolved value will be written).
    pub at: FieldPath,
    /// The record it must end up pointing to.
    pub target: FieldPath,
}

#[derive(Debug, Default)]
pub struct UnmarshallingContext {
    path: FieldPath,
    /// 🏠 Where the document being walked starts. The top-level record's own document
    /// starts at the root; a referenced one starts at the field that references it.
    base: FieldPath,
    cycle_refs: Vec<CycleRef>,
    /// 📏 stored position → built position, for lists that dropped a cyclic element
    list_layouts: HashMap<FieldPath, Vec<Option<usize>>>,
}

impl UnmarshallingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: Segment) {
        self.path.push(segment);
    }

    pub fn pop(&mut self) {
        self.path.pop();
    }

    pub fn current_path(&self) -> &FieldPath {
        &self.path
    }

    /// 🚪 A referenced document starts here. Its absolute `ref` paths were written from
    /// its own top, so they hang off the current path until [`Self::leave_document`].
    pub fn enter_document(&mut self) -> FieldPath {
        std::mem::replace(&mut self.base, self.path.clone())
    }

    pub fn leave_document(&mut self, outer: FieldPath) {
        self.base = outer;
    }

    /// 📌 Record a cyclic placeholder at the current path.
    ///
    /// The marker's presence is what counts. A string value is the target path
    /// (absolute from the top of the current document, or relative to here); any other
    /// value points at the top of the current document.
    pub fn add_cycle_ref(&mut self, marker: &Value) -> Result<(), String> {
        let target = match marker {
            Value::String(reference) if FieldPath::is_relative(reference) => self.path.resolve(reference)?,
            Value::String(reference) => self.base.join(&self.path.resolve(reference)?),
            other => {
                debug!("🔁 cyclic marker {} at '{}' carries no path, pointing it at '{}'", other, self.path, self.base);
                self.base.clone()
            }
        };
        self.cycle_refs.push(CycleRef {
            at: self.path.clone(),
            target,
        });
        Ok(())
    }

    /// 📏 The list at the current path kept only some of its stored elements.
    /// `layout[i]` is where stored element `i` ended up, `None` if it was cyclic.
    pub fn record_list_layout(&mut self, layout: Vec<Option<usize>>) {
        if layout.iter().any(Option::is_none) {
            self.list_layouts.insert(self.path.clone(), layout);
        }
    }

    pub fn cycle_refs(&self) -> &[CycleRef] {
        &self.cycle_refs
    }

    /// 🔁 Hand over every patch, addressed by built positions.
    ///
    /// A target that runs through a cyclic list element can never resolve: that element
    /// is itself a hole. That is an [`UnmarshallError::UnresolvedCycle`] right away.
    pub fn take_cycle_refs(&mut self) -> Result<Vec<CycleRef>, UnmarshallError> {
        std::mem::take(&mut self.cycle_refs)
            .into_iter()
            .map(|cycle| match (self.built_path(&cycle.at, true), self.built_path(&cycle.target, false)) {
                (Some(at), Some(target)) => Ok(CycleRef { at, target }),
                _ => Err(UnmarshallError::UnresolvedCycle {
                    at: cycle.at,
                    target: cycle.target,
                }),
            })
            .collect()
    }

    /// Rewrite stored positions to built ones. Only a placeholder's own `at` may end on a
    /// dropped element; the patch pass appends there, so the position is kept as is.
    fn built_path(&self, path: &FieldPath, placeholder_tail: bool) -> Option<FieldPath> {
        let mut stored = FieldPath::root();
        let mut built = FieldPath::root();
        let last = path.len().saturating_sub(1);
        for (position, segment) in path.segments().iter().enumerate() {
            let mapped = match (segment, self.list_layouts.get(&stored)) {
                (Segment::Index(index), Some(layout)) => match layout.get(*index).copied().flatten() {
                    Some(built_index) => Segment::Index(built_index),
                    None if placeholder_tail && position == last => segment.clone(),
                    None => return None,
                },
                _ => segment.clone(),
            };
            stored.push(segment.clone());
            built.push(mapped);
        }
        Some(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_the_stack_tracks_our_every_move() {
        let mut ctx = UnmarshallingContext::new();
        ctx.push(Segment::Field("chapters".into()));
        ctx.push(Segment::Index(2));
        assert_eq!(ctx.current_path().to_string(), "chapters/2");
        ctx.pop();
        assert_eq!(ctx.current_path().to_string(), "chapters");
    }

    #[test]
    fn the_one_where_cycle_refs_remember_both_ends() -> Result<(), UnmarshallError> {
        let mut ctx = UnmarshallingContext::new();
        ctx.push(Segment::Field("chapters".into()));
        ctx.push(Segment::Index(0));
        ctx.push(Segment::Field("book".into()));
        ctx.add_cycle_ref(&json!("../../..")).expect("valid relative ref");
        ctx.add_cycle_ref(&json!(true)).expect("non-string marker");

        let refs = ctx.take_cycle_refs()?;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].at.to_string(), "chapters/0/book");
        assert!(refs[0].target.is_root());
        assert!(refs[1].target.is_root());
        assert!(ctx.cycle_refs().is_empty());
        Ok(())
    }

    #[test]
    fn the_one_where_a_referenced_document_keeps_its_own_top() -> Result<(), UnmarshallError> {
        let mut ctx = UnmarshallingContext::new();
        ctx.push(Segment::Field("author".into()));
        let outer = ctx.enter_document();
        for segment in FieldPath::parse("books/0/chapters/0/book").segments() {
            ctx.push(segment.clone());
        }
        ctx.add_cycle_ref(&json!("books/0")).expect("absolute ref");
        ctx.add_cycle_ref(&json!("../..")).expect("relative ref");
        ctx.add_cycle_ref(&json!(1)).expect("bare marker");
        ctx.leave_document(outer);
        ctx.add_cycle_ref(&json!("title")).expect("absolute ref, outside again");

        let targets: Vec<String> = ctx.take_cycle_refs()?.iter().map(|c| c.target.to_string()).collect();
        assert_eq!(
            targets,
            vec!["author/books/0", "author/books/0/chapters", "author", "title"]
        );
        Ok(())
    }

    #[test]
    fn the_one_where_dropped_list_elements_shift_everyone_after_them() -> Result<(), UnmarshallError> {
        let mut ctx = UnmarshallingContext::new();
        ctx.push(Segment::Field("chapters".into()));
        ctx.push(Segment::Index(0));
        ctx.add_cycle_ref(&json!("")).expect("placeholder element");
        ctx.pop();
        ctx.push(Segment::Index(2));
        ctx.push(Segment::Field("book".into()));
        ctx.add_cycle_ref(&json!("chapters/1")).expect("points at a kept sibling");
        ctx.pop();
        ctx.pop();
        // 📏 stored [hole, a, b] became built [a, b]
        ctx.record_list_layout(vec![None, Some(0), Some(1)]);

        let refs = ctx.take_cycle_refs()?;
        assert_eq!(refs[0].at.to_string(), "chapters/0");
        assert_eq!(refs[1].at.to_string(), "chapters/1/book");
        assert_eq!(refs[1].target.to_string(), "chapters/0");
        Ok(())
    }

    #[test]
    fn the_one_where_pointing_at_a_hole_is_a_dead_end() {
        let mut ctx = UnmarshallingContext::new();
        ctx.push(Segment::Field("chapters".into()));
        ctx.push(Segment::Index(0));
        ctx.add_cycle_ref(&json!("chapters/0")).expect("points at itself");
        ctx.pop();
        ctx.record_list_layout(vec![None, Some(0)]);

        let result = ctx.take_cycle_refs();
        assert!(matches!(result, Err(UnmarshallError::UnresolvedCycle { .. })));
    }
}
