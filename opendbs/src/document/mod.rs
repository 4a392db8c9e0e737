// Document value type: nested `data` plus the flattened mirror view

use crate::error::{OpenDbsError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Keys owned by the engine in the flattened view. Data fields with the
/// same name are not mirrored over them.
pub const RESERVED_FIELDS: [&str; 4] = ["id", "data", "createdAt", "updatedAt"];

/// Key holding timestamps (and search scores) in query results
pub const METADATA_FIELD: &str = "_metadata";

/// A stored document. Persists as its flattened view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub struct Document {
    pub id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        let now = now();
        Document {
            id: id.into(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace `data` wholesale, returning the previous value.
    pub fn replace_data(&mut self, data: Value) -> Value {
        self.updated_at = now();
        std::mem::replace(&mut self.data, data)
    }

    /// A top-level field of `data`, if `data` is an object holding it.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_object().and_then(|m| m.get(name))
    }

    /// `{id, data, createdAt, updatedAt, ...data fields}`
    pub fn flattened(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        if let Some(fields) = self.data.as_object() {
            for (k, v) in fields {
                if !RESERVED_FIELDS.contains(&k.as_str()) {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        obj.insert("id".into(), Value::String(self.id.clone()));
        obj.insert("data".into(), self.data.clone());
        obj.insert("createdAt".into(), timestamp_value(&self.created_at));
        obj.insert("updatedAt".into(), timestamp_value(&self.updated_at));
        obj
    }

    /// Query result shape: `{id, ...data fields, _metadata: {createdAt, updatedAt}}`
    pub fn to_result(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        if let Some(fields) = self.data.as_object() {
            for (k, v) in fields {
                obj.insert(k.clone(), v.clone());
            }
        }
        obj.insert("id".into(), Value::String(self.id.clone()));
        obj.insert(METADATA_FIELD.into(), Value::Object(self.metadata()));
        obj
    }

    /// Result shape with a similarity score added to `_metadata`.
    pub fn to_scored_result(&self, score: f64) -> Map<String, Value> {
        let mut obj = self.to_result();
        if let Some(Value::Object(meta)) = obj.get_mut(METADATA_FIELD) {
            meta.insert("score".into(), Value::from(score));
        }
        obj
    }

    fn metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("createdAt".into(), timestamp_value(&self.created_at));
        meta.insert("updatedAt".into(), timestamp_value(&self.updated_at));
        meta
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.flattened())
    }
}

impl TryFrom<Value> for Document {
    type Error = OpenDbsError;

    fn try_from(value: Value) -> Result<Self> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(OpenDbsError::Decode(format!(
                    "document must be an object, got {other}"
                )))
            }
        };

        let id = match obj.remove("id") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(OpenDbsError::Decode("document is missing its id".into())),
        };
        let created_at = parse_timestamp(obj.remove("createdAt").as_ref());
        let updated_at = parse_timestamp(obj.remove("updatedAt").as_ref());

        // Documents written without a nested `data` carry their fields flat.
        let data = match obj.remove("data") {
            Some(data) => data,
            None => Value::Object(obj),
        };

        Ok(Document {
            id,
            data,
            created_at,
            updated_at,
        })
    }
}

/// Parse caller-supplied document JSON. Only objects are documents.
pub fn parse_data(json: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| OpenDbsError::Parse(format!("document is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(OpenDbsError::Parse(format!(
            "document must be a JSON object, got {value}"
        )));
    }
    Ok(value)
}

/// Order for document ids: numeric ids numerically, before any
/// non-numeric ids, which order lexicographically.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Current time at millisecond precision, matching what persists.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// RFC 3339 strings or epoch milliseconds. Anything else reads as the epoch.
pub(crate) fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_default(),
        _ => DateTime::<Utc>::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_flattened_mirrors_data() {
        let doc = Document::new("1", json!({ "name": "Alice", "age": 28 }));
        let flat = doc.flattened();
        assert_eq!(flat["id"], json!("1"));
        assert_eq!(flat["name"], json!("Alice"));
        assert_eq!(flat["age"], json!(28));
        assert_eq!(flat["data"], json!({ "name": "Alice", "age": 28 }));
    }

    #[test]
    fn test_reserved_keys_win_in_flattened_view() {
        let doc = Document::new("7", json!({ "id": "other", "data": 1 }));
        let flat = doc.flattened();
        assert_eq!(flat["id"], json!("7"));
        assert_eq!(flat["data"], json!({ "id": "other", "data": 1 }));
    }

    #[test]
    fn test_result_shape() {
        let doc = Document::new("3", json!({ "name": "Bob" }));
        let result = doc.to_result();
        assert_eq!(result["id"], json!("3"));
        assert_eq!(result["name"], json!("Bob"));
        assert!(result.get("data").is_none());
        assert!(result[METADATA_FIELD]["createdAt"].is_string());
        assert!(result[METADATA_FIELD]["updatedAt"].is_string());
    }

    #[test]
    fn test_scored_result() {
        let doc = Document::new("3", json!({ "v": [1, 0] }));
        let result = doc.to_scored_result(0.5);
        assert_eq!(result[METADATA_FIELD]["score"], json!(0.5));
    }

    #[test]
    fn test_value_round_trip() {
        let doc = Document::new("12", json!({ "title": "x", "n": [1, 2] }));
        let value = Value::from(doc.clone());
        let back = Document::try_from(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_legacy_flat_document() {
        let doc = Document::try_from(json!({ "id": 5, "name": "Carol" })).unwrap();
        assert_eq!(doc.id, "5");
        assert_eq!(doc.data, json!({ "name": "Carol" }));
        assert_eq!(doc.created_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_missing_id_rejected() {
        assert!(Document::try_from(json!({ "data": {} })).is_err());
    }

    #[test]
    fn test_replace_data_returns_old() {
        let mut doc = Document::new("1", json!({ "a": 1 }));
        let old = doc.replace_data(json!({ "b": 2 }));
        assert_eq!(old, json!({ "a": 1 }));
        assert_eq!(doc.field("b"), Some(&json!(2)));
        assert_eq!(doc.field("a"), None);
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(parse_data(r#"{"a": 1}"#).unwrap(), json!({ "a": 1 }));
        assert!(matches!(parse_data("[1]"), Err(OpenDbsError::Parse(_))));
        assert!(matches!(parse_data("{oops"), Err(OpenDbsError::Parse(_))));
    }

    #[test]
    fn test_compare_ids() {
        let mut ids = vec!["10", "b", "2", "a", "1"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "a", "b"]);
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let ts = parse_timestamp(Some(&json!(1_700_000_000_000i64)));
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }
}
