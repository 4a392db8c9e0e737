use crate::error::{OpenDbsError, Result};
use crate::schema::{FieldDefinition, FieldType, RackSchema};
use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Result of validating a document
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a document's data against a rack schema.
/// Null counts as absent. A field declared `object` accepts any value.
pub fn validate_document(schema: &RackSchema, data: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let fields = match data.as_object() {
        Some(m) => m,
        None => {
            result
                .errors
                .push("Document data must be a JSON object".into());
            return result;
        }
    };

    for (field_name, field_def) in schema {
        match fields.get(field_name) {
            None | Some(Value::Null) => {
                if field_def.required {
                    result
                        .errors
                        .push(format!("Field '{field_name}' is required"));
                }
            }
            Some(value) => validate_field_value(field_name, field_def, value, &mut result),
        }
    }

    result
}

/// Fill absent (or null) fields that declare a default value.
pub fn apply_defaults(schema: &RackSchema, data: &mut Value) {
    let fields = match data.as_object_mut() {
        Some(m) => m,
        None => return,
    };

    for (field_name, field_def) in schema {
        let has_value = fields
            .get(field_name)
            .map(|v| !v.is_null())
            .unwrap_or(false);

        if !has_value {
            if let Some(default) = &field_def.default_value {
                fields.insert(field_name.clone(), default.clone());
            }
        }
    }
}

fn validate_field_value(
    field_name: &str,
    field_def: &FieldDefinition,
    value: &Value,
    result: &mut ValidationResult,
) {
    let ok = match field_def.field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => true,
        FieldType::Date => value.as_str().map(is_date_string).unwrap_or(false),
    };

    if !ok {
        result.errors.push(format!(
            "Field '{field_name}' must be of type {}, got {}",
            field_def.field_type,
            type_name(value)
        ));
    }
}

fn is_date_string(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Runtime type name of a JSON value, arrays distinguished from objects
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Apply defaults, then validate. Fails with every violated rule.
pub fn validate_and_prepare(schema: &RackSchema, data: &mut Value) -> Result<()> {
    apply_defaults(schema, data);
    let result = validate_document(schema, data);

    if !result.is_ok() {
        return Err(OpenDbsError::Validation(result.errors));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use serde_json::json;

    fn test_schema() -> RackSchema {
        parse_schema_str(
            r#"
name: { type: string, required: true }
email: { type: string, required: true }
age: { type: number }
active: { type: boolean }
tags: { type: array }
profile: { type: object }
joined: { type: date }
role: { type: string, defaultValue: member }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_user() {
        let schema = test_schema();
        let data = json!({
            "name": "Alice",
            "email": "alice@test.com",
            "age": 28,
            "active": true,
            "tags": ["a"],
            "joined": "2024-03-01"
        });
        let result = validate_document(&schema, &data);
        assert!(result.is_ok(), "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = test_schema();
        let result = validate_document(&schema, &json!({ "name": "Alice" }));
        assert!(!result.is_ok());
        assert_eq!(result.errors, vec!["Field 'email' is required".to_string()]);
    }

    #[test]
    fn test_null_counts_as_missing() {
        let schema = test_schema();
        let result = validate_document(&schema, &json!({ "name": "Alice", "email": null }));
        assert!(result.errors.iter().any(|e| e.contains("email")));
    }

    #[test]
    fn test_type_mismatch() {
        let schema = test_schema();
        let data = json!({ "name": 42, "email": "a@b.c", "age": "old" });
        let result = validate_document(&schema, &data);
        assert_eq!(result.errors.len(), 2);
        assert!(result
            .errors
            .contains(&"Field 'name' must be of type string, got number".to_string()));
        assert!(result
            .errors
            .contains(&"Field 'age' must be of type number, got string".to_string()));
    }

    #[test]
    fn test_array_is_not_object_but_object_accepts_anything() {
        let schema = test_schema();
        let data = json!({ "name": "A", "email": "e", "tags": {"x": 1}, "profile": [1, 2] });
        let result = validate_document(&schema, &data);
        assert_eq!(
            result.errors,
            vec!["Field 'tags' must be of type array, got object".to_string()]
        );
    }

    #[test]
    fn test_date_field() {
        let schema = test_schema();
        let ok = json!({ "name": "A", "email": "e", "joined": "2024-03-01T10:00:00Z" });
        assert!(validate_document(&schema, &ok).is_ok());
        let bad = json!({ "name": "A", "email": "e", "joined": "yesterday" });
        assert!(!validate_document(&schema, &bad).is_ok());
    }

    #[test]
    fn test_non_object_data() {
        let schema = test_schema();
        assert!(!validate_document(&schema, &json!([1, 2])).is_ok());
    }

    #[test]
    fn test_apply_defaults() {
        let schema = test_schema();
        let mut data = json!({ "name": "A", "email": "e" });
        apply_defaults(&schema, &mut data);
        assert_eq!(data["role"], json!("member"));
    }

    #[test]
    fn test_apply_defaults_doesnt_overwrite() {
        let schema = test_schema();
        let mut data = json!({ "name": "A", "email": "e", "role": "admin" });
        apply_defaults(&schema, &mut data);
        assert_eq!(data["role"], json!("admin"));
    }

    #[test]
    fn test_validate_and_prepare() {
        let schema = test_schema();
        let mut data = json!({ "name": "A" });
        match validate_and_prepare(&schema, &mut data) {
            Err(OpenDbsError::Validation(errors)) => {
                assert_eq!(errors, vec!["Field 'email' is required".to_string()])
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
