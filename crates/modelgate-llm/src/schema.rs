//! Schema compiler for structured output
//!
//! Callers supply arbitrary, request-scoped JSON Schema documents, so the
//! type system is synthesized at runtime: a closed descriptor
//! (scalar / array / object / any) built by recursive compilation, consumed
//! by a single generic validator. Providers with a native structured mode get
//! the original schema document; everything else gets parse-and-validate
//! against the compiled descriptor.

use crate::error::{Error, Result};
use serde_json::Value;

/// Primitive JSON Schema types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// `"type": "string"`
    String,
    /// `"type": "number"`
    Number,
    /// `"type": "integer"`
    Integer,
    /// `"type": "boolean"`
    Boolean,
    /// `"type": "null"`
    Null,
}

impl ScalarKind {
    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

/// One field of an object descriptor
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Compiled descriptor of the field value
    pub descriptor: SchemaDescriptor,
    /// Whether the field appears in the schema's `required` list
    pub required: bool,
    /// Field description, carried for provider prompts
    pub description: Option<String>,
    /// Default for a missing optional field; null unless the schema says otherwise
    pub default: Value,
}

/// Recursively defined type descriptor compiled from a JSON Schema document
#[derive(Debug, Clone)]
pub enum SchemaDescriptor {
    /// Unrecognized or missing `type`: any value is accepted
    Any,
    /// A primitive value
    Scalar(ScalarKind),
    /// An array of homogeneous items
    Array(Box<SchemaDescriptor>),
    /// An object with a fixed, ordered field set
    Object(Vec<FieldDescriptor>),
}

impl SchemaDescriptor {
    /// Compile a JSON Schema object into a descriptor
    ///
    /// `object` schemas become field lists driven by `properties` and
    /// `required`; optional fields are nullable with a null default unless the
    /// schema supplies one. `array` wraps the compiled `items`. Scalar types
    /// map to primitives, anything else is unconstrained.
    #[must_use]
    pub fn compile(schema: &Value) -> Self {
        let json_type = schema.get("type").and_then(Value::as_str).unwrap_or("");

        match json_type {
            "object" => {
                let required: Vec<&str> = schema
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|list| list.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();

                let mut fields = Vec::new();
                if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                    for (name, field_schema) in properties {
                        let is_required = required.contains(&name.as_str());
                        let default = field_schema
                            .get("default")
                            .cloned()
                            .unwrap_or(Value::Null);
                        fields.push(FieldDescriptor {
                            name: name.clone(),
                            descriptor: Self::compile(field_schema),
                            required: is_required,
                            description: field_schema
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            default,
                        });
                    }
                }
                Self::Object(fields)
            }
            "array" => {
                let items = schema.get("items").cloned().unwrap_or(Value::Null);
                Self::Array(Box::new(Self::compile(&items)))
            }
            other => match ScalarKind::from_type_name(other) {
                Some(kind) => Self::Scalar(kind),
                None => Self::Any,
            },
        }
    }

    /// Validate `value` against this descriptor, returning it with defaults
    /// filled in for missing optional fields
    ///
    /// # Errors
    /// Returns [`Error::SchemaViolation`] naming the offending field path.
    pub fn conform(&self, value: Value) -> Result<Value> {
        conform_at(self, value, "$")
    }
}

fn conform_at(descriptor: &SchemaDescriptor, value: Value, path: &str) -> Result<Value> {
    match descriptor {
        SchemaDescriptor::Any => Ok(value),
        SchemaDescriptor::Scalar(kind) => {
            let ok = match kind {
                ScalarKind::String => value.is_string(),
                ScalarKind::Number => value.is_number(),
                ScalarKind::Integer => value.is_i64() || value.is_u64(),
                ScalarKind::Boolean => value.is_boolean(),
                ScalarKind::Null => value.is_null(),
            };
            if ok {
                Ok(value)
            } else {
                Err(Error::schema_violation(
                    path,
                    format!("expected {}, got {}", kind.type_name(), type_of(&value)),
                ))
            }
        }
        SchemaDescriptor::Array(items) => {
            let Value::Array(elements) = value else {
                return Err(Error::schema_violation(
                    path,
                    format!("expected array, got {}", type_of(&value)),
                ));
            };
            let mut conformed = Vec::with_capacity(elements.len());
            for (index, element) in elements.into_iter().enumerate() {
                let element_path = format!("{path}[{index}]");
                conformed.push(conform_at(items, element, &element_path)?);
            }
            Ok(Value::Array(conformed))
        }
        SchemaDescriptor::Object(fields) => {
            let Value::Object(mut map) = value else {
                return Err(Error::schema_violation(
                    path,
                    format!("expected object, got {}", type_of(&value)),
                ));
            };
            for field in fields {
                let field_path = format!("{path}.{}", field.name);
                match map.remove(&field.name) {
                    Some(Value::Null) if !field.required => {
                        map.insert(field.name.clone(), Value::Null);
                    }
                    Some(present) => {
                        let conformed = conform_at(&field.descriptor, present, &field_path)?;
                        map.insert(field.name.clone(), conformed);
                    }
                    None if field.required => {
                        return Err(Error::schema_violation(
                            field_path,
                            "missing required field",
                        ));
                    }
                    None => {
                        map.insert(field.name.clone(), field.default.clone());
                    }
                }
            }
            Ok(Value::Object(map))
        }
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A named, compiled schema tied to its source document
///
/// The source document rides along untouched so providers with a native
/// structured mode receive exactly what the caller sent.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    /// Schema name
    pub name: String,
    /// The original JSON Schema document
    pub document: Value,
    /// The compiled descriptor
    pub root: SchemaDescriptor,
    /// Whether the caller asked for strict provider-side enforcement
    pub strict: bool,
}

impl CompiledSchema {
    /// Compile a named schema document
    #[must_use]
    pub fn compile(name: impl Into<String>, document: &Value, strict: bool) -> Self {
        Self {
            name: name.into(),
            document: document.clone(),
            root: SchemaDescriptor::compile(document),
            strict,
        }
    }

    /// Validate a value, filling defaults for missing optional fields
    ///
    /// # Errors
    /// Returns [`Error::SchemaViolation`] naming the offending field path.
    pub fn conform(&self, value: Value) -> Result<Value> {
        self.root.conform(value)
    }
}

/// Pull a JSON value out of free-form model output
///
/// Providers without a native structured mode wrap JSON in prose or code
/// fences; try a direct parse first, then a fenced block, then the outermost
/// brace pair.
///
/// # Errors
/// Returns [`Error::InvalidResponse`] when no parseable JSON is found.
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::InvalidResponse(
        "response did not contain parseable JSON".to_string(),
    ))
}

fn fenced_block(text: &str) -> Option<&str> {
    let after_open = text.split_once("```")?.1;
    // Skip an optional language tag on the fence line
    let body = after_open.split_once('\n')?.1;
    let inner = body.split_once("```")?.0;
    Some(inner.trim())
}
