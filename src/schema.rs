//! Per-resource row schemas with boundary coercion.
//!
//! The hosted backend returns loosely typed rows (numbers may arrive as
//! strings, booleans as `"true"`, ...). A [`RowSchema`] attached to a
//! [`ResourceDescriptor`](crate::descriptor::ResourceDescriptor) validates
//! and coerces rows once, at the fetch/event boundary, so merge policies and
//! consumers see well-typed fields. Rows that cannot be coerced are logged
//! and skipped, tolerated like any other feed inconsistency.

use crate::row::Row;
use serde_json::Value;
use std::fmt;

/// Expected type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 text.
    Text,
    /// 64-bit integer; string digits are coerced.
    Integer,
    /// 64-bit float; integers and numeric strings are coerced.
    Float,
    /// Boolean; `"true"`/`"false"` strings are coerced.
    Boolean,
    /// Timestamp carried as an RFC 3339 string or epoch number, kept as-is.
    Timestamp,
    /// Arbitrary JSON, accepted unchanged.
    Json,
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    field_type: FieldType,
    required: bool,
}

/// Declared shape of one backend resource's rows.
#[derive(Debug, Clone)]
pub struct RowSchema {
    resource: String,
    fields: Vec<FieldSpec>,
}

impl RowSchema {
    /// Start an empty schema for `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            fields: Vec::new(),
        }
    }

    /// Declare an optional field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: false,
        });
        self
    }

    /// Declare a required field; rows missing it are rejected.
    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: true,
        });
        self
    }

    /// Resource this schema belongs to.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Validate and coerce one row.
    ///
    /// Declared fields are coerced to their declared type; fields not named
    /// by the schema pass through unchanged (the backend may return extra
    /// columns the client does not care about).
    pub fn validate(&self, row: Row) -> Result<Row, SchemaViolation> {
        let mut map = row.into_map();
        for spec in &self.fields {
            match map.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(SchemaViolation {
                            resource: self.resource.clone(),
                            field: spec.name.clone(),
                            message: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    let coerced = coerce(spec.field_type, value).ok_or_else(|| SchemaViolation {
                        resource: self.resource.clone(),
                        field: spec.name.clone(),
                        message: format!(
                            "expected {:?}, got incompatible value {}",
                            spec.field_type, value
                        ),
                    })?;
                    map.insert(spec.name.clone(), coerced);
                }
            }
        }
        Ok(Row::from(map))
    }
}

/// Coerce `value` to `field_type`, or `None` if incompatible.
fn coerce(field_type: FieldType, value: &Value) -> Option<Value> {
    match field_type {
        FieldType::Text => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => None,
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldType::Float => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim() {
                "true" | "TRUE" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "FALSE" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldType::Timestamp => match value {
            Value::String(_) | Value::Number(_) => Some(value.clone()),
            _ => None,
        },
        FieldType::Json => Some(value.clone()),
    }
}

/// A row failed schema validation.
#[derive(Debug, Clone)]
pub struct SchemaViolation {
    /// Resource the row came from.
    pub resource: String,
    /// Offending field.
    pub field: String,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.resource, self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn news_schema() -> RowSchema {
        RowSchema::new("news")
            .required("id", FieldType::Integer)
            .required("title", FieldType::Text)
            .field("published", FieldType::Boolean)
            .field("created_at", FieldType::Timestamp)
    }

    #[test]
    fn test_valid_row_passes_unchanged() {
        let row = Row::from_value(json!({"id": 3, "title": "Enrollment open", "published": true}))
            .unwrap();
        let validated = news_schema().validate(row.clone()).unwrap();
        assert_eq!(validated, row);
    }

    #[test]
    fn test_string_integer_is_coerced() {
        let row = Row::from_value(json!({"id": "17", "title": "x"})).unwrap();
        let validated = news_schema().validate(row).unwrap();
        assert_eq!(validated.get_i64("id"), Some(17));
    }

    #[test]
    fn test_string_boolean_is_coerced() {
        let row = Row::from_value(json!({"id": 1, "title": "x", "published": "true"})).unwrap();
        let validated = news_schema().validate(row).unwrap();
        assert_eq!(validated.get_bool("published"), Some(true));
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let row = Row::from_value(json!({"title": "no id"})).unwrap();
        let err = news_schema().validate(row).unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn test_incompatible_value_is_rejected() {
        let row = Row::from_value(json!({"id": {"nested": true}, "title": "x"})).unwrap();
        assert!(news_schema().validate(row).is_err());
    }

    #[test]
    fn test_undeclared_fields_pass_through() {
        let row = Row::from_value(json!({"id": 1, "title": "x", "extra": [1, 2]})).unwrap();
        let validated = news_schema().validate(row).unwrap();
        assert_eq!(validated.get("extra"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_missing_optional_field_is_fine() {
        let row = Row::from_value(json!({"id": 1, "title": "x"})).unwrap();
        assert!(news_schema().validate(row).is_ok());
    }
}
