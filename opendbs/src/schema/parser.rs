use super::types::RackSchema;
use crate::error::Result;
use std::path::Path;

/// Parse a rack schema file (YAML or JSON) into a RackSchema
pub fn parse_schema(path: &Path) -> Result<RackSchema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a rack schema string. JSON input is accepted since it is valid YAML.
pub fn parse_schema_str(content: &str) -> Result<RackSchema> {
    let schema: RackSchema = serde_yaml::from_str(content)?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn test_parse_yaml_schema() {
        let schema = parse_schema_str(
            r#"
name: { type: string, required: true }
age: { type: number }
role: { type: string, defaultValue: member }
"#,
        )
        .unwrap();

        assert_eq!(schema.len(), 3);
        assert_eq!(schema["name"].field_type, FieldType::String);
        assert!(schema["name"].required);
        assert!(!schema["age"].required);
        assert_eq!(
            schema["role"].default_value,
            Some(serde_json::Value::String("member".into()))
        );
    }

    #[test]
    fn test_parse_json_schema() {
        let schema =
            parse_schema_str(r#"{"tags": {"type": "array"}, "meta": {"type": "object", "required": true}}"#)
                .unwrap();
        assert_eq!(schema["tags"].field_type, FieldType::Array);
        assert!(schema["meta"].required);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(parse_schema_str("x: { type: blob }").is_err());
    }
}
