//! 🗺️ The Mapping Schema — which record types are searchable, which fields they
//! carry, and how each field is stored.
//!
//! 🎬 *[a schema is built once. validated once. then read by everyone, forever.]*
//! *[nobody mutates the schema. the schema mutates you.]*
//!
//! 🧠 Knowledge graph:
//! - [`TypeMapping`]: one searchable record type (identity, index, store type, fields)
//! - [`FieldMapping`]: one field (plain / component / reference, converter, flags)
//! - [`MappingSchema`]: all of the above plus the converter registry
//! - Built through [`SchemaBuilder`] / [`TypeMappingBuilder`] or from TOML via
//!   [`SchemaConfig`]; [`MappingSchema::validate`] runs exactly once, inside `build()`.
//! - `index_definition` turns a type mapping into the store's index-definition JSON.
//!
//! ⚠️ The unmarshaller and the write queue only ever hold `&MappingSchema` /
//! `Arc<MappingSchema>`. If you find yourself wanting `&mut`, go for a walk first. 🦆

mod builder;
mod config;
mod field;
pub mod index_definition;

pub use builder::{SchemaBuilder, TypeMappingBuilder};
pub use config::{FieldConfig, FieldKindConfig, SchemaConfig, TypeConfig};
pub use field::{DataType, FieldKind, FieldMapping};

use std::sync::Arc;

use anyhow::{Result, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::converters::{Converter, ConverterRegistry};

/// 🆔 What an identity looks like once it leaves the string-only world of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityType {
    #[default]
    String,
    Integer,
}

impl IdentityType {
    /// 🔄 Convert a stored identity (string or number) into this identity type.
    pub fn convert(&self, raw: &Value) -> Result<Value, String> {
        match (self, raw) {
            (IdentityType::String, Value::String(_)) => Ok(raw.clone()),
            (IdentityType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (IdentityType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
            (IdentityType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("identity '{s}' is not an integer: {e}")),
            (_, other) => Err(format!("identity {other} cannot be converted to {self:?}")),
        }
    }

    /// The data type a reference to this identity gets in the index definition.
    pub fn data_type(&self) -> DataType {
        match self {
            IdentityType::String => DataType::Keyword,
            IdentityType::Integer => DataType::Long,
        }
    }
}

/// 🔑 Stringify an identity value the way the store wants to see it in a URL.
pub fn identity_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 📦 One searchable record type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMapping {
    pub name: String,
    pub identity_field: String,
    pub identity_type: IdentityType,
    /// Root types get their own index and are the only valid reference targets.
    pub root: bool,
    /// Whether the aggregate full-text field is populated for this type.
    pub all: bool,
    pub index_name: String,
    pub store_type_name: String,
    pub fields: IndexMap<String, FieldMapping>,
}

impl TypeMapping {
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.get(name)
    }
}

/// 🗺️ Every searchable type, plus the converters their fields may name.
#[derive(Debug, Clone)]
pub struct MappingSchema {
    types: IndexMap<String, TypeMapping>,
    converters: ConverterRegistry,
}

impl MappingSchema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub(crate) fn new_unvalidated(types: IndexMap<String, TypeMapping>, converters: ConverterRegistry) -> Self {
        Self { types, converters }
    }

    pub fn type_mapping(&self, type_name: &str) -> Option<&TypeMapping> {
        self.types.get(type_name)
    }

    pub fn field_mapping(&self, type_name: &str, field: &str) -> Option<&FieldMapping> {
        self.types.get(type_name).and_then(|t| t.field(field))
    }

    /// 🔎 Reverse lookup from the store's type name (what bulk responses talk about).
    pub fn find_by_store_type(&self, store_type_name: &str) -> Option<&TypeMapping> {
        self.types.values().find(|t| t.store_type_name == store_type_name)
    }

    /// 🔎 Reverse lookup for search hits, which know both their index and their type.
    pub fn find_by_hit(&self, index: &str, store_type_name: &str) -> Option<&TypeMapping> {
        self.types
            .values()
            .find(|t| t.index_name == index && t.store_type_name == store_type_name)
            .or_else(|| self.find_by_store_type(store_type_name))
    }

    pub fn index_name(&self, type_name: &str) -> Option<&str> {
        self.types.get(type_name).map(|t| t.index_name.as_str())
    }

    pub fn store_type_name(&self, type_name: &str) -> Option<&str> {
        self.types.get(type_name).map(|t| t.store_type_name.as_str())
    }

    pub fn converter(&self, name: &str) -> Option<Arc<dyn Converter>> {
        self.converters.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeMapping> {
        self.types.values()
    }

    pub fn root_types(&self) -> impl Iterator<Item = &TypeMapping> {
        self.types.values().filter(|t| t.root)
    }

    /// ✅ Cross-type validation. Runs once, from `SchemaBuilder::build`.
    ///
    /// - component targets must be mapped types
    /// - reference targets must be mapped *root* types
    /// - named converters must be registered
    /// - a field may not shadow the identity field
    /// - a boost is a positive, finite number
    pub fn validate(&self) -> Result<()> {
        for type_mapping in self.types.values() {
            for (field_name, field) in &type_mapping.fields {
                if field_name == &type_mapping.identity_field {
                    bail!(
                        "💀 {}.{} is the identity field and cannot also carry a field mapping",
                        type_mapping.name,
                        field_name
                    );
                }
                match &field.kind {
                    FieldKind::Plain => {}
                    FieldKind::Component { target } => {
                        if !self.types.contains_key(target) {
                            bail!(
                                "💀 {}.{} is declared as component of unmapped type '{}'",
                                type_mapping.name,
                                field_name,
                                target
                            );
                        }
                    }
                    FieldKind::Reference { target } => match self.types.get(target) {
                        None => bail!(
                            "💀 {}.{} declared as reference to non-searchable type '{}'",
                            type_mapping.name,
                            field_name,
                            target
                        ),
                        Some(t) if !t.root => bail!(
                            "💀 {}.{} declared as reference to non-root type '{}'",
                            type_mapping.name,
                            field_name,
                            target
                        ),
                        Some(_) => {}
                    },
                }
                if let Some(boost) = field.boost
                    && !(boost.is_finite() && boost > 0.0)
                {
                    bail!(
                        "💀 {}.{} has boost {}, and only a positive number can make a match count more",
                        type_mapping.name,
                        field_name,
                        boost
                    );
                }
                if let Some(converter) = &field.converter
                    && !self.converters.contains(converter)
                {
                    bail!(
                        "💀 {}.{} names converter '{}', which nobody registered",
                        type_mapping.name,
                        field_name,
                        converter
                    );
                }
            }
        }
        Ok(())
    }
}

/// 🐫 `BookReview` → `bookReview`, the store-side type naming convention.
pub(crate) fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// 📚 The library schema most tests lean on: authors, books, chapters, tags.
    pub(crate) fn library_schema() -> MappingSchema {
        MappingSchema::builder()
            .add_type(
                TypeMappingBuilder::new("Author")
                    .identity_type(IdentityType::Integer)
                    .index("library")
                    .property("name")
                    .field("books", FieldMapping::component("Book")),
            )
            .add_type(
                TypeMappingBuilder::new("Book")
                    .index("library")
                    .property("title")
                    .property("tags")
                    .field("author", FieldMapping::reference("Author"))
                    .field("pages", FieldMapping::plain().converter("integer"))
                    .field("chapters", FieldMapping::component("Chapter")),
            )
            .add_type(
                TypeMappingBuilder::new("Chapter")
                    .root(false)
                    .property("heading")
                    .field("book", FieldMapping::component("Book")),
            )
            .build()
            .expect("💀 the library schema is valid by construction")
    }

    #[test]
    fn the_one_where_lookups_find_types_by_every_name_they_go_by() {
        let schema = library_schema();
        assert_eq!(schema.index_name("Book"), Some("library"));
        assert_eq!(schema.store_type_name("Book"), Some("book"));
        assert_eq!(schema.find_by_store_type("author").map(|t| t.name.as_str()), Some("Author"));
        assert_eq!(schema.find_by_hit("library", "book").map(|t| t.name.as_str()), Some("Book"));
        assert!(schema.find_by_store_type("dragon").is_none());
        assert!(schema.field_mapping("Book", "author").is_some_and(FieldMapping::is_reference));
    }

    #[test]
    fn the_one_where_only_root_types_get_their_own_index() {
        let schema = library_schema();
        let roots: Vec<&str> = schema.root_types().map(|t| t.name.as_str()).collect();
        assert_eq!(roots, vec!["Author", "Book"]);
    }

    #[test]
    fn the_one_where_a_reference_to_a_non_root_type_is_refused() {
        let result = MappingSchema::builder()
            .add_type(TypeMappingBuilder::new("Page").root(false).property("text"))
            .add_type(TypeMappingBuilder::new("Book").field("page", FieldMapping::reference("Page")))
            .build();
        let err = result.expect_err("reference to non-root must fail validation");
        assert!(err.to_string().contains("non-root"), "{err}");
    }

    #[test]
    fn the_one_where_a_reference_to_nowhere_is_refused() {
        let err = MappingSchema::builder()
            .add_type(TypeMappingBuilder::new("Book").field("author", FieldMapping::reference("Ghost")))
            .build()
            .expect_err("reference to unmapped type must fail");
        assert!(err.to_string().contains("non-searchable"), "{err}");
    }

    #[test]
    fn the_one_where_unregistered_converters_are_caught_at_build_time() {
        let err = MappingSchema::builder()
            .add_type(TypeMappingBuilder::new("Book").field("isbn", FieldMapping::plain().converter("isbn13")))
            .build()
            .expect_err("unknown converter must fail");
        assert!(err.to_string().contains("isbn13"), "{err}");
    }

    #[test]
    fn the_one_where_a_boost_has_to_be_positive() {
        for boost in [0.0, -2.0, f64::NAN] {
            let err = MappingSchema::builder()
                .add_type(TypeMappingBuilder::new("Book").field("title", FieldMapping::plain().boost(boost)))
                .build()
                .expect_err("a boost that is not positive must fail");
            assert!(err.to_string().contains("boost"), "{err}");
        }
        let schema = MappingSchema::builder()
            .add_type(TypeMappingBuilder::new("Book").field("title", FieldMapping::plain().boost(2.0)))
            .build();
        assert!(schema.is_ok());
    }

    #[test]
    fn the_one_where_identities_convert_both_ways() {
        assert_eq!(IdentityType::Integer.convert(&json!("42")), Ok(json!(42)));
        assert_eq!(IdentityType::Integer.convert(&json!(42)), Ok(json!(42)));
        assert!(IdentityType::Integer.convert(&json!("forty-two")).is_err());
        assert_eq!(IdentityType::String.convert(&json!(7)), Ok(json!("7")));
        assert!(IdentityType::String.convert(&json!({"id": 1})).is_err());
        assert_eq!(identity_string(&json!(42)), "42");
        assert_eq!(identity_string(&json!("abc")), "abc");
    }

    #[test]
    fn the_one_where_camel_humps_get_lowered() {
        assert_eq!(lower_camel("BookReview"), "bookReview");
        assert_eq!(lower_camel(""), "");
    }
}
