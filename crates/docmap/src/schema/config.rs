//! 📋 The TOML/env face of the schema builders.
//!
//! ```toml
//! [schema.types.Book]
//! index = "library"
//! properties = ["title", "tags"]
//!
//! [schema.types.Book.fields.author]
//! kind = "reference"
//! target = "Author"
//! ```
//!
//! This is data, not a DSL. Serde reads it, [`SchemaConfig::build`] turns it into
//! builders, and the builders do the validating.

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde::Deserialize;

use super::{DataType, FieldMapping, IdentityType, MappingSchema, SchemaBuilder, TypeMappingBuilder};
use crate::converters::ConverterRegistry;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub types: IndexMap<String, TypeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TypeConfig {
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default)]
    pub identity_type: IdentityType,
    #[serde(default = "default_true")]
    pub root: bool,
    #[serde(default = "default_true")]
    pub all: bool,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub only: Option<Vec<String>>,
    #[serde(default)]
    pub except: Option<Vec<String>>,
    #[serde(default)]
    pub fields: IndexMap<String, FieldConfig>,
}

/// 🏷️ `kind` is `plain` (default), `component` or `reference`; the latter two need a `target`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FieldConfig {
    #[serde(default)]
    pub kind: FieldKindConfig,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub converter: Option<String>,
    #[serde(default)]
    pub exclude_from_all: bool,
    #[serde(default = "default_true")]
    pub analyzed: bool,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub boost: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKindConfig {
    #[default]
    Plain,
    Component,
    Reference,
}

// 🆔 "id", the identity field name of every record since the dawn of ORMs
fn default_identity() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

impl FieldConfig {
    fn to_mapping(&self, type_name: &str, field_name: &str) -> Result<FieldMapping> {
        let mut mapping = match (self.kind, &self.target) {
            (FieldKindConfig::Plain, None) => FieldMapping::plain(),
            (FieldKindConfig::Plain, Some(target)) => bail!(
                "💀 {type_name}.{field_name} is plain but names target '{target}'. Did you mean component or reference?"
            ),
            (FieldKindConfig::Component, Some(target)) => FieldMapping::component(target),
            (FieldKindConfig::Reference, Some(target)) => FieldMapping::reference(target),
            (kind, None) => bail!("💀 {type_name}.{field_name} is {kind:?} but has no target type"),
        };
        if let Some(converter) = &self.converter {
            mapping = mapping.converter(converter);
        }
        if let Some(data_type) = self.data_type {
            mapping = mapping.data_type(data_type);
        }
        if let Some(boost) = self.boost {
            mapping = mapping.boost(boost);
        }
        Ok(mapping
            .exclude_from_all(self.exclude_from_all)
            .analyzed(self.analyzed))
    }
}

impl TypeConfig {
    fn to_builder(&self, type_name: &str) -> Result<TypeMappingBuilder> {
        let mut builder = TypeMappingBuilder::new(type_name)
            .identity(&self.identity)
            .identity_type(self.identity_type)
            .root(self.root)
            .all(self.all)
            .properties(self.properties.iter().cloned());
        if let Some(index) = &self.index {
            builder = builder.index(index);
        }
        if let Some(store_type) = &self.type_name {
            builder = builder.store_type(store_type);
        }
        if let Some(only) = &self.only {
            builder = builder.only(only.iter().cloned());
        }
        if let Some(except) = &self.except {
            builder = builder.except(except.iter().cloned());
        }
        for (field_name, field) in &self.fields {
            builder = builder.field(field_name, field.to_mapping(type_name, field_name)?);
        }
        Ok(builder)
    }
}

impl SchemaConfig {
    /// 🏗️ Turn configuration into a validated [`MappingSchema`].
    pub fn build(&self, converters: ConverterRegistry) -> Result<MappingSchema> {
        let mut builder = SchemaBuilder::default().converters(converters);
        for (type_name, type_config) in &self.types {
            builder = builder.add_type(
                type_config
                    .to_builder(type_name)
                    .with_context(|| format!("💀 Type '{type_name}' has a broken field configuration"))?,
            );
        }
        builder.build()
    }
}
