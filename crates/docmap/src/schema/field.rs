//! 🏷️ Field mappings: what the schema knows about one field of one record type.

use serde::{Deserialize, Serialize};

/// 🧬 How a field's value is stored.
///
/// One enum, three answers, so "component AND reference" is not a state anyone can
/// even spell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Scalars, lists of scalars, free-form objects. Stored as-is.
    Plain,
    /// A whole nested record stored inline in the parent document.
    Component { target: String },
    /// Only the other record's identity is stored; resolved with a live fetch.
    Reference { target: String },
}

/// 📋 One field of one record type, as the mapping schema sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub kind: FieldKind,
    /// Name of a converter in the schema's [`ConverterRegistry`](crate::converters::ConverterRegistry).
    pub converter: Option<String>,
    /// Keep this field out of the aggregate full-text field.
    pub exclude_from_all: bool,
    /// Analyzed text gets term vectors in the index definition.
    pub analyzed: bool,
    /// Store data type used by the index-definition translator (`text`, `keyword`, `long`...).
    pub data_type: Option<DataType>,
    /// 🚀 Relevance multiplier for matches in this field. `None` leaves it at the store's 1.0.
    pub boost: Option<f64>,
}

/// 🗃️ The store-side data types the index-definition translator knows how to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Keyword,
    Long,
    Integer,
    Float,
    Double,
    Boolean,
    Date,
    Object,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Keyword => "keyword",
            DataType::Long => "long",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Object => "object",
        }
    }
}

impl FieldMapping {
    fn with_kind(kind: FieldKind) -> Self {
        Self {
            kind,
            converter: None,
            exclude_from_all: false,
            analyzed: true,
            data_type: None,
            boost: None,
        }
    }

    pub fn plain() -> Self {
        Self::with_kind(FieldKind::Plain)
    }

    pub fn component(target: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Component {
            target: target.into(),
        })
    }

    pub fn reference(target: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Reference {
            target: target.into(),
        })
    }

    pub fn converter(mut self, name: impl Into<String>) -> Self {
        self.converter = Some(name.into());
        self
    }

    pub fn exclude_from_all(mut self, exclude: bool) -> Self {
        self.exclude_from_all = exclude;
        self
    }

    pub fn analyzed(mut self, analyzed: bool) -> Self {
        self.analyzed = analyzed;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn boost(mut self, boost: f64) -> Self {
        self.boost = Some(boost);
        self
    }

    pub fn is_component(&self) -> bool {
        matches!(self.kind, FieldKind::Component { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }

    /// The record type this field points at, for components and references.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Plain => None,
            FieldKind::Component { target } | FieldKind::Reference { target } => Some(target),
        }
    }
}
