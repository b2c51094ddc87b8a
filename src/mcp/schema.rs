//! Input schema translation.
//!
//! Tool manifests describe their arguments with JSON Schema. The orchestrator
//! only needs a small, checkable subset of it, so schemas are translated into
//! a [`ParamValidator`] tree. Anything outside that subset (formats, ranges,
//! patterns, `anyOf`/`oneOf`/`allOf`, type unions) becomes [`ParamValidator::Any`].
//! That loss is intentional: the capability server remains the authority on
//! its own inputs.

use serde_json::{Map, Value, json};

/// One property of an object validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub validator: ParamValidator,
    pub required: bool,
    pub description: Option<String>,
}

/// Native parameter validator.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValidator {
    /// Accepts any value.
    Any,
    String,
    Number,
    Integer,
    Boolean,
    /// String restricted to a fixed set of values.
    Enum(Vec<String>),
    /// Array whose elements all satisfy the inner validator.
    Array(Box<ParamValidator>),
    Object(Vec<Field>),
}

/// Why a value was rejected, with a `$.a.b[2]`-style location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

impl ParamValidator {
    /// Translate a JSON-Schema-like description.
    #[must_use]
    pub fn from_schema(schema: &Value) -> Self {
        let Some(obj) = schema.as_object() else {
            return Self::Any;
        };

        match obj.get("type").and_then(Value::as_str) {
            Some("object") => Self::object_from(obj),
            Some("string") => match obj.get("enum").and_then(Value::as_array) {
                Some(values) => {
                    let values: Vec<String> = values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect();
                    if values.is_empty() {
                        Self::String
                    } else {
                        Self::Enum(values)
                    }
                }
                None => Self::String,
            },
            Some("array") => match obj.get("items") {
                Some(items) => Self::Array(Box::new(Self::from_schema(items))),
                None => Self::Array(Box::new(Self::Any)),
            },
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            _ => Self::Any,
        }
    }

    fn object_from(obj: &Map<String, Value>) -> Self {
        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| Field {
                        name: name.clone(),
                        validator: Self::from_schema(prop),
                        required: required.contains(&name.as_str()),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .map(ToString::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self::Object(fields)
    }

    /// Look up an object field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        match self {
            Self::Object(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Check a value against this validator.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
        let fail = |reason: String| {
            Err(SchemaViolation {
                path: path.to_string(),
                reason,
            })
        };

        match self {
            Self::Any => Ok(()),
            Self::String if value.is_string() => Ok(()),
            Self::Number if value.is_number() => Ok(()),
            Self::Integer if is_integral(value) => Ok(()),
            Self::Boolean if value.is_boolean() => Ok(()),
            Self::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => Ok(()),
                _ => fail(format!("expected one of {allowed:?}, got {value}")),
            },
            Self::Array(inner) => match value.as_array() {
                Some(items) => items
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, item)| inner.validate_at(item, &format!("{path}[{i}]"))),
                None => fail(format!("expected array, got {}", type_name(value))),
            },
            Self::Object(fields) => {
                let Some(obj) = value.as_object() else {
                    return fail(format!("expected object, got {}", type_name(value)));
                };
                for field in fields {
                    let child = format!("{path}.{}", field.name);
                    match obj.get(&field.name) {
                        // Absent and explicit null both count as "not provided".
                        None | Some(Value::Null) if field.required => {
                            return Err(SchemaViolation {
                                path: child,
                                reason: "required field is missing".to_string(),
                            });
                        }
                        None | Some(Value::Null) => {}
                        Some(v) => field.validator.validate_at(v, &child)?,
                    }
                }
                Ok(())
            }
            Self::String => fail(format!("expected string, got {}", type_name(value))),
            Self::Number => fail(format!("expected number, got {}", type_name(value))),
            Self::Integer => fail(format!("expected integer, got {}", type_name(value))),
            Self::Boolean => fail(format!("expected boolean, got {}", type_name(value))),
        }
    }

    /// Render the validator back to JSON Schema for the model provider.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::Any => json!({}),
            Self::String => json!({ "type": "string" }),
            Self::Number => json!({ "type": "number" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Enum(values) => json!({ "type": "string", "enum": values }),
            Self::Array(inner) => json!({ "type": "array", "items": inner.to_json_schema() }),
            Self::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    let mut prop = field.validator.to_json_schema();
                    if let (Some(desc), Some(obj)) = (&field.description, prop.as_object_mut()) {
                        obj.insert("description".to_string(), Value::String(desc.clone()));
                    }
                    properties.insert(field.name.clone(), prop);
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }
}

/// Whole numbers count as integers even when written as `2.0`.
fn is_integral(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_required_and_optional() {
        let v = ParamValidator::from_schema(&json!({
            "type": "object",
            "properties": { "a": { "type": "string" }, "b": { "type": "integer" } },
            "required": ["a"]
        }));

        let a = v.field("a").unwrap();
        assert!(a.required);
        assert_eq!(a.validator, ParamValidator::String);

        let b = v.field("b").unwrap();
        assert!(!b.required);
        assert_eq!(b.validator, ParamValidator::Integer);

        assert!(v.validate(&json!({ "a": "x" })).is_ok());
        assert!(v.validate(&json!({ "a": "x", "b": 3 })).is_ok());
        let err = v.validate(&json!({ "b": 3 })).unwrap_err();
        assert_eq!(err.path, "$.a");
        assert!(v.validate(&json!({ "a": "x", "b": 1.5 })).is_err());
        assert!(v.validate(&json!({ "a": 1 })).is_err());
    }

    #[test]
    fn test_integer_accepts_whole_floats() {
        let v = ParamValidator::from_schema(&json!({"type": "integer"}));
        assert!(v.validate(&json!(2)).is_ok());
        assert!(v.validate(&json!(2.0)).is_ok());
        assert!(v.validate(&json!(-7.0)).is_ok());

        let err = v.validate(&json!(2.5)).unwrap_err();
        assert!(err.reason.contains("expected integer"));
        assert!(v.validate(&json!("2")).is_err());
    }

    #[test]
    fn test_string_enum() {
        let v = ParamValidator::from_schema(&json!({
            "type": "string",
            "enum": ["celsius", "fahrenheit"]
        }));
        assert_eq!(
            v,
            ParamValidator::Enum(vec!["celsius".to_string(), "fahrenheit".to_string()])
        );
        assert!(v.validate(&json!("celsius")).is_ok());
        assert!(v.validate(&json!("kelvin")).is_err());
    }

    #[test]
    fn test_array_items() {
        let v = ParamValidator::from_schema(&json!({
            "type": "array",
            "items": { "type": "number" }
        }));
        assert!(v.validate(&json!([1, 2.5])).is_ok());
        let err = v.validate(&json!([1, "two"])).unwrap_err();
        assert_eq!(err.path, "$[1]");

        let untyped = ParamValidator::from_schema(&json!({ "type": "array" }));
        assert_eq!(untyped, ParamValidator::Array(Box::new(ParamValidator::Any)));
        assert!(untyped.validate(&json!([1, "two", null])).is_ok());
    }

    #[test]
    fn test_unsupported_features_degrade_to_any() {
        for schema in [
            json!({ "anyOf": [{ "type": "string" }, { "type": "number" }] }),
            json!({ "type": ["string", "null"] }),
            json!({ "type": "null" }),
            json!({}),
            json!(true),
        ] {
            assert_eq!(ParamValidator::from_schema(&schema), ParamValidator::Any);
        }

        // Constraints on supported types are dropped, the type is kept.
        let ranged = ParamValidator::from_schema(&json!({ "type": "integer", "minimum": 5 }));
        assert_eq!(ranged, ParamValidator::Integer);
        assert!(ranged.validate(&json!(1)).is_ok());
    }

    #[test]
    fn test_nested_object_path() {
        let v = ParamValidator::from_schema(&json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": { "tags": { "type": "array", "items": { "type": "string" } } },
                    "required": ["tags"]
                }
            }
        }));
        let err = v
            .validate(&json!({ "filter": { "tags": ["ok", 3] } }))
            .unwrap_err();
        assert_eq!(err.path, "$.filter.tags[1]");
    }

    #[test]
    fn test_to_json_schema_keeps_required_and_descriptions() {
        let v = ParamValidator::from_schema(&json!({
            "type": "object",
            "properties": {
                "q": { "type": "string", "description": "query", "maxLength": 10 }
            },
            "required": ["q"]
        }));
        let out = v.to_json_schema();
        assert_eq!(out["properties"]["q"]["type"], "string");
        assert_eq!(out["properties"]["q"]["description"], "query");
        assert!(out["properties"]["q"].get("maxLength").is_none());
        assert_eq!(out["required"], json!(["q"]));
    }
}
