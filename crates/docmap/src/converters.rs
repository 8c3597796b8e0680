//! 🔄 Converters: custom scalar parsers attached to individual fields.
//!
//! A field mapping may name a converter. When the unmarshaller meets a scalar for
//! that field, the converter gets the raw text and hands back a typed value. If it
//! can't, the whole field fails, loudly, with the field's name attached. No silent
//! coercion here. We have standards. Low ones, but standards.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

/// 🔧 Parses the raw text of one stored scalar into the value the record wants.
pub trait Converter: Debug + Send + Sync {
    fn convert(&self, raw: &str) -> Result<Value, String>;

    /// ✍️ The way back: the text the marshaller stores for a converted value.
    fn render(&self, value: &Value) -> Result<String, String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(format!("{other} has no text form")),
        }
    }
}

/// 🔢 `"42"` → `42`
#[derive(Debug, Clone, Copy)]
pub struct IntegerConverter;

impl Converter for IntegerConverter {
    fn convert(&self, raw: &str) -> Result<Value, String> {
        raw.trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| format!("'{raw}' is not an integer: {e}"))
    }
}

/// 🌊 `"4.5"` → `4.5`
#[derive(Debug, Clone, Copy)]
pub struct FloatConverter;

impl Converter for FloatConverter {
    fn convert(&self, raw: &str) -> Result<Value, String> {
        let parsed = raw
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("'{raw}' is not a float: {e}"))?;
        serde_json::Number::from_f64(parsed)
            .map(Value::Number)
            .ok_or_else(|| format!("'{raw}' is not a finite float"))
    }
}

/// ✅ `"true"` / `"yes"` / `"1"` and friends.
#[derive(Debug, Clone, Copy)]
pub struct BooleanConverter;

impl Converter for BooleanConverter {
    fn convert(&self, raw: &str) -> Result<Value, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{raw}' is not a boolean")),
        }
    }
}

/// 📋 `"a, b,c"` → `["a","b","c"]`. Empty input is an empty list, not `[""]`.
#[derive(Debug, Clone, Copy)]
pub struct CommaListConverter;

impl Converter for CommaListConverter {
    fn convert(&self, raw: &str) -> Result<Value, String> {
        if raw.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(Value::Array(
            raw.split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
        ))
    }

    fn render(&self, value: &Value) -> Result<String, String> {
        let Value::Array(items) = value else {
            return Err(format!("{value} is not a list"));
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(format!("list item {other} is not text")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join(","))
    }
}

/// 📇 Converters by name. Schemas refer to converters by name; validation checks
/// every named converter is registered before the schema is handed out.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn Converter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("integer", IntegerConverter);
        registry.register("float", FloatConverter);
        registry.register("boolean", BooleanConverter);
        registry.register("comma_list", CommaListConverter);
        registry
    }
}

impl ConverterRegistry {
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, converter: impl Converter + 'static) {
        self.converters.insert(name.into(), Arc::new(converter));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Converter>> {
        self.converters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.converters.contains_key(name)
    }
}
