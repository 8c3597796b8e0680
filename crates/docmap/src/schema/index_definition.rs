//! 📐 Index definitions: a type mapping, rendered as the JSON the store wants at
//! index-creation time.
//!
//! ```text
//! {"mappings": {"properties": {
//!     "title":  {"type": "text", "copy_to": "all", "term_vector": "with_positions_offsets", "boost": 2.0},
//!     "author": {"type": "long"},
//!     "chapters": {"type": "object", "properties": {...}}
//! }}}
//! ```
//!
//! Pure function. No I/O. The store backend decides what to do with the result.

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use super::{DataType, FieldKind, MappingSchema, TypeMapping};

/// 🗂️ Name of the aggregate full-text field fed by `copy_to`.
pub const ALL_FIELD: &str = "all";

/// Components nest; a component that contains itself would nest forever, so we stop here.
const MAX_COMPONENT_DEPTH: usize = 8;

/// 📐 The full index definition for one type.
pub fn index_definition(schema: &MappingSchema, type_name: &str) -> Result<Value> {
    let type_mapping = schema
        .type_mapping(type_name)
        .with_context(|| format!("💀 No mapping for type '{type_name}', nothing to define"))?;
    let mut properties = properties_for(schema, type_mapping, type_mapping.all, 0);
    if type_mapping.all {
        properties.insert(ALL_FIELD.to_string(), json!({ "type": "text" }));
    }
    Ok(json!({ "mappings": { "properties": properties } }))
}

fn properties_for(schema: &MappingSchema, type_mapping: &TypeMapping, all: bool, depth: usize) -> Map<String, Value> {
    let mut properties = Map::new();
    for (field_name, field) in &type_mapping.fields {
        let mut options = Map::new();
        let data_type = match &field.kind {
            FieldKind::Reference { target } => schema
                .type_mapping(target)
                .map(|t| t.identity_type.data_type())
                .unwrap_or(DataType::Keyword),
            FieldKind::Component { target } => {
                if depth < MAX_COMPONENT_DEPTH
                    && let Some(nested) = schema.type_mapping(target)
                {
                    options.insert(
                        "properties".to_string(),
                        Value::Object(properties_for(schema, nested, all, depth + 1)),
                    );
                }
                DataType::Object
            }
            FieldKind::Plain => match (field.data_type, &field.converter) {
                (Some(declared), _) => declared,
                // -- converted fields are stored as their raw text
                (None, Some(_)) => DataType::Keyword,
                (None, None) => DataType::Text,
            },
        };
        options.insert("type".to_string(), json!(data_type.as_str()));
        let is_text = matches!(data_type, DataType::Text | DataType::Keyword);
        if all && is_text && !field.exclude_from_all {
            options.insert("copy_to".to_string(), json!(ALL_FIELD));
        }
        if data_type == DataType::Text && field.analyzed {
            options.insert("term_vector".to_string(), json!("with_positions_offsets"));
        }
        // -- objects have no boost of their own, their leaves do
        if let Some(boost) = field.boost
            && data_type != DataType::Object
        {
            options.insert("boost".to_string(), json!(boost));
        }
        properties.insert(field_name.clone(), Value::Object(options));
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::library_schema;
    use crate::schema::{FieldMapping, IdentityType, TypeMappingBuilder};

    #[test]
    fn the_one_where_a_book_becomes_a_mapping() -> Result<()> {
        let schema = library_schema();
        let definition = index_definition(&schema, "Book")?;
        let properties = &definition["mappings"]["properties"];

        assert_eq!(properties["title"]["type"], "text");
        assert_eq!(properties["title"]["copy_to"], ALL_FIELD);
        assert_eq!(properties["title"]["term_vector"], "with_positions_offsets");
        // 🔗 Author identities are integers, so the reference is a long
        assert_eq!(properties["author"]["type"], "long");
        assert_eq!(properties["pages"]["type"], "keyword");
        assert_eq!(properties["chapters"]["type"], "object");
        assert_eq!(properties["chapters"]["properties"]["heading"]["type"], "text");
        assert_eq!(properties[ALL_FIELD]["type"], "text");
        Ok(())
    }

    #[test]
    fn the_one_where_excluded_fields_stay_out_of_the_aggregate() -> Result<()> {
        let schema = MappingSchema::builder()
            .add_type(
                TypeMappingBuilder::new("Note")
                    .identity_type(IdentityType::Integer)
                    .field("secret", FieldMapping::plain().exclude_from_all(true).analyzed(false))
                    .field("count", FieldMapping::plain().data_type(DataType::Long)),
            )
            .build()?;
        let definition = index_definition(&schema, "Note")?;
        let properties = &definition["mappings"]["properties"];
        assert!(properties["secret"].get("copy_to").is_none());
        assert!(properties["secret"].get("term_vector").is_none());
        assert_eq!(properties["count"]["type"], "long");
        assert!(properties["count"].get("copy_to").is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_a_boosted_title_outshines_the_blurb() -> Result<()> {
        let schema = MappingSchema::builder()
            .add_type(
                TypeMappingBuilder::new("Book")
                    .field("title", FieldMapping::plain().boost(2.0))
                    .property("blurb")
                    .field("cover", FieldMapping::component("Cover").boost(3.0)),
            )
            .add_type(TypeMappingBuilder::new("Cover").root(false).property("artist"))
            .build()?;
        let definition = index_definition(&schema, "Book")?;
        let properties = &definition["mappings"]["properties"];
        assert_eq!(properties["title"]["boost"], 2.0);
        assert!(properties["blurb"].get("boost").is_none());
        assert_eq!(properties["cover"]["type"], "object");
        assert!(properties["cover"].get("boost").is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_all_disabled_means_no_aggregate_field() -> Result<()> {
        let schema = MappingSchema::builder()
            .add_type(TypeMappingBuilder::new("Quiet").all(false).property("title"))
            .build()?;
        let definition = index_definition(&schema, "Quiet")?;
        assert!(definition["mappings"]["properties"].get(ALL_FIELD).is_none());
        assert!(definition["mappings"]["properties"]["title"].get("copy_to").is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_unknown_types_get_no_definition() {
        assert!(index_definition(&library_schema(), "Dragon").is_err());
    }
}
