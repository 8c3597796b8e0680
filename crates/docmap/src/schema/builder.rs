//! 🏗️ Schema builders. Ordinary method calls in, validated schema out.
//!
//! You call methods. They do what they say. `build()` validates once. That's the whole trick.

use anyhow::{Result, bail};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::{FieldMapping, IdentityType, MappingSchema, TypeMapping, lower_camel};
use crate::converters::ConverterRegistry;

/// 📦 Builds one [`TypeMapping`].
///
/// Mappable properties are the declared `property(..)` names plus every field with a
/// custom mapping. `only` keeps just the listed ones, `except` drops the listed ones;
/// using both is an error. Properties without a custom mapping
/// become plain fields.
#[derive(Debug, Clone)]
pub struct TypeMappingBuilder {
    name: String,
    identity_field: String,
    identity_type: IdentityType,
    root: bool,
    all: bool,
    index: Option<String>,
    store_type: Option<String>,
    properties: IndexSet<String>,
    custom: IndexMap<String, FieldMapping>,
    only: Option<Vec<String>>,
    except: Option<Vec<String>>,
}

impl TypeMappingBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: "id".to_string(),
            identity_type: IdentityType::default(),
            root: true,
            all: true,
            index: None,
            store_type: None,
            properties: IndexSet::new(),
            custom: IndexMap::new(),
            only: None,
            except: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    pub fn identity_type(mut self, identity_type: IdentityType) -> Self {
        self.identity_type = identity_type;
        self
    }

    pub fn root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    pub fn all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn store_type(mut self, store_type: impl Into<String>) -> Self {
        self.store_type = Some(store_type.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.insert(name.into());
        self
    }

    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn field(mut self, name: impl Into<String>, mapping: FieldMapping) -> Self {
        self.custom.insert(name.into(), mapping);
        self
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn except<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// 🔧 Resolve properties, apply `only`/`except`, fill in defaults.
    pub fn build(self) -> Result<TypeMapping> {
        let only = self.only.filter(|o| !o.is_empty());
        let except = self.except.filter(|e| !e.is_empty());
        if only.is_some() && except.is_some() {
            bail!(
                "💀 Both 'only' and 'except' were used in '{}': provide one or neither but not both",
                self.name
            );
        }

        let mut mappable: IndexSet<String> = self.properties;
        mappable.extend(self.custom.keys().cloned());
        if let Some(only) = &only {
            mappable.retain(|p| only.contains(p));
        }
        if let Some(except) = &except {
            mappable.retain(|p| !except.contains(p));
        }
        // -- the identity travels as the document id, never as a mapped field
        mappable.shift_remove(&self.identity_field);

        let mut custom = self.custom;
        let fields: IndexMap<String, FieldMapping> = mappable
            .into_iter()
            .map(|name| {
                let mapping = custom.shift_remove(&name).unwrap_or_else(FieldMapping::plain);
                (name, mapping)
            })
            .collect();

        let store_type_name = self.store_type.unwrap_or_else(|| lower_camel(&self.name));
        let index_name = self.index.unwrap_or_else(|| store_type_name.to_lowercase());

        debug!(
            "🏗️ Built mapping for '{}' → index '{}', type '{}', {} fields",
            self.name,
            index_name,
            store_type_name,
            fields.len()
        );

        Ok(TypeMapping {
            name: self.name,
            identity_field: self.identity_field,
            identity_type: self.identity_type,
            root: self.root,
            all: self.all,
            index_name,
            store_type_name,
            fields,
        })
    }
}

/// 🗺️ Collects type builders and a converter registry, then builds + validates.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeMappingBuilder>,
    converters: Option<ConverterRegistry>,
}

impl SchemaBuilder {
    pub fn add_type(mut self, builder: TypeMappingBuilder) -> Self {
        self.types.push(builder);
        self
    }

    pub fn converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = Some(converters);
        self
    }

    pub fn build(self) -> Result<MappingSchema> {
        let mut types = IndexMap::new();
        for builder in self.types {
            let mapping = builder.build()?;
            if types.contains_key(&mapping.name) {
                bail!("💀 Type '{}' was mapped twice. Pick a favourite.", mapping.name);
            }
            types.insert(mapping.name.clone(), mapping);
        }
        let schema = MappingSchema::new_unvalidated(types, self.converters.unwrap_or_default());
        schema.validate()?;
        Ok(schema)
    }
}
