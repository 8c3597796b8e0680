//! 🧭 Field paths: where in the record tree we are, typed instead of slash-delimited.
//!
//! On the wire a cyclic back-pointer says `{"ref": "chapters/0/book"}`. In here that
//! is `[Field("chapters"), Index(0), Field("book")]`. The empty path is the top-level
//! record itself. Relative references (`../..`) climb up from the path where the
//! back-pointer was found.

use std::fmt;

/// 🪜 One step: a field name, or a position in a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
}

impl Segment {
    /// Numeric tokens are sequence positions, everything else is a field name.
    pub fn parse(token: &str) -> Self {
        match token.parse::<usize>() {
            Ok(index) => Segment::Index(index),
            Err(_) => Segment::Field(token.to_string()),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => f.write_str(name),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// 🧭 An ordered list of segments from the top-level record down.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    /// The empty path: the top-level record.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.0.pop()
    }

    /// 🔤 Parse the absolute slash form. Empty tokens are skipped, so `"/a//b/"` is `a/b`.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split('/')
                .filter(|token| !token.is_empty())
                .map(Segment::parse)
                .collect(),
        )
    }

    /// Does this back-pointer climb from where it was found, or start from the top?
    pub fn is_relative(reference: &str) -> bool {
        let trimmed = reference.trim();
        trimmed == "." || trimmed == ".." || trimmed.starts_with("./") || trimmed.starts_with("../")
    }

    /// `self` followed by every segment of `tail`.
    pub fn join(&self, tail: &FieldPath) -> FieldPath {
        let mut joined = self.clone();
        joined.0.extend(tail.0.iter().cloned());
        joined
    }

    /// 🔗 Resolve a back-pointer found at `self`.
    ///
    /// A reference starting with `.` or `..` is relative to `self`: `..` climbs one
    /// segment, `.` stays put. Anything else is absolute from the top-level record.
    /// Climbing above the top-level record is an error.
    pub fn resolve(&self, reference: &str) -> Result<FieldPath, String> {
        let trimmed = reference.trim();
        if !Self::is_relative(trimmed) {
            return Ok(Self::parse(trimmed));
        }
        let mut resolved = self.clone();
        for token in trimmed.split('/').filter(|t| !t.is_empty()) {
            match token {
                "." => {}
                ".." => {
                    if resolved.pop().is_none() {
                        return Err(format!("'{reference}' climbs above the top-level record from '{self}'"));
                    }
                }
                other => resolved.push(Segment::parse(other)),
            }
        }
        Ok(resolved)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<Vec<Segment>> for FieldPath {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}
