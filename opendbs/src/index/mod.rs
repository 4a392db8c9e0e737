use crate::document::Document;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Hashable form of an indexable scalar. Numbers key on their f64 value,
/// so `28` and `28.0` share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Str(String),
    Num(u64),
    Bool(bool),
}

impl IndexKey {
    /// None for null, arrays and objects, which are never indexed.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(IndexKey::Str(s.clone())),
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => n.as_f64().map(|f| {
                // -0.0 and 0.0 are the same key
                let f = if f == 0.0 { 0.0 } else { f };
                IndexKey::Num(f.to_bits())
            }),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Equality index for one field: scalar value -> ids holding it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldIndex {
    entries: HashMap<IndexKey, HashSet<String>>,
}

impl FieldIndex {
    /// Scan documents and index their scalar values of `field`.
    pub fn build<'a, I>(field: &str, documents: I) -> Self
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut index = FieldIndex::default();
        for doc in documents {
            if let Some(value) = doc.field(field) {
                index.add(&doc.id, value);
            }
        }
        index
    }

    pub fn add(&mut self, id: &str, value: &Value) {
        if let Some(key) = IndexKey::from_value(value) {
            self.entries.entry(key).or_default().insert(id.to_string());
        }
    }

    /// Remove `id` from the set for `value`, dropping the entry once empty.
    pub fn remove(&mut self, id: &str, value: &Value) {
        let Some(key) = IndexKey::from_value(value) else {
            return;
        };
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Exact id set for a scalar value. None means no document holds it.
    pub fn lookup(&self, value: &Value) -> Option<&HashSet<String>> {
        IndexKey::from_value(value).and_then(|key| self.entries.get(&key))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of distinct values indexed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All equality indexes of a rack, keyed by field name.
///
/// Indexes hold ids only; documents live in the rack's own map. Every
/// mutation of that map must be mirrored here through `on_insert`,
/// `on_update` or `on_delete` before the mutating call returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexManager {
    indices: BTreeMap<String, FieldIndex>,
}

impl IndexManager {
    /// Build one index per field from the given documents.
    pub fn rebuild<'a, I>(fields: &[String], documents: I) -> Self
    where
        I: IntoIterator<Item = &'a Document> + Clone,
    {
        let mut manager = IndexManager::default();
        for field in fields {
            manager.create(field, documents.clone());
        }
        manager
    }

    pub fn get(&self, field: &str) -> Option<&FieldIndex> {
        self.indices.get(field)
    }

    /// Indexed field names, sorted
    pub fn fields(&self) -> Vec<String> {
        self.indices.keys().cloned().collect()
    }

    /// Install an index backfilled from `documents`. False if it already existed.
    pub fn create<'a, I>(&mut self, field: &str, documents: I) -> bool
    where
        I: IntoIterator<Item = &'a Document>,
    {
        if self.indices.contains_key(field) {
            return false;
        }
        self.indices
            .insert(field.to_string(), FieldIndex::build(field, documents));
        true
    }

    pub fn drop_index(&mut self, field: &str) -> bool {
        self.indices.remove(field).is_some()
    }

    pub fn on_insert(&mut self, doc: &Document) {
        for (field, index) in self.indices.iter_mut() {
            if let Some(value) = doc.field(field) {
                index.add(&doc.id, value);
            }
        }
    }

    pub fn on_update(&mut self, id: &str, old_data: &Value, new_data: &Value) {
        for (field, index) in self.indices.iter_mut() {
            if let Some(old) = old_data.as_object().and_then(|m| m.get(field)) {
                index.remove(id, old);
            }
            if let Some(new) = new_data.as_object().and_then(|m| m.get(field)) {
                index.add(id, new);
            }
        }
    }

    pub fn on_delete(&mut self, doc: &Document) {
        for (field, index) in self.indices.iter_mut() {
            if let Some(value) = doc.field(field) {
                index.remove(&doc.id, value);
            }
        }
    }

    /// Empty every index but keep them defined.
    pub fn clear_entries(&mut self) {
        for index in self.indices.values_mut() {
            index.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(set: Option<&HashSet<String>>) -> Vec<String> {
        let mut v: Vec<String> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
        v.sort();
        v
    }

    #[test]
    fn test_only_scalars_are_keys() {
        assert!(IndexKey::from_value(&json!("a")).is_some());
        assert!(IndexKey::from_value(&json!(1.5)).is_some());
        assert!(IndexKey::from_value(&json!(false)).is_some());
        assert!(IndexKey::from_value(&json!(null)).is_none());
        assert!(IndexKey::from_value(&json!([1])).is_none());
        assert!(IndexKey::from_value(&json!({"a": 1})).is_none());
    }

    #[test]
    fn test_integer_and_float_share_key() {
        assert_eq!(
            IndexKey::from_value(&json!(28)),
            IndexKey::from_value(&json!(28.0))
        );
        assert_ne!(
            IndexKey::from_value(&json!(1)),
            IndexKey::from_value(&json!("1"))
        );
    }

    #[test]
    fn test_build_skips_missing_and_non_scalar() {
        let docs = vec![
            Document::new("1", json!({ "age": 28 })),
            Document::new("2", json!({ "age": [28] })),
            Document::new("3", json!({ "name": "x" })),
            Document::new("4", json!({ "age": 28 })),
        ];
        let index = FieldIndex::build("age", &docs);
        assert_eq!(index.len(), 1);
        assert_eq!(ids(index.lookup(&json!(28))), vec!["1", "4"]);
    }

    #[test]
    fn test_remove_prunes_empty_entry() {
        let mut index = FieldIndex::default();
        index.add("1", &json!("red"));
        index.remove("1", &json!("red"));
        assert!(index.is_empty());
        assert!(index.lookup(&json!("red")).is_none());
    }

    #[test]
    fn test_manager_maintenance() {
        let mut manager = IndexManager::default();
        let a = Document::new("1", json!({ "color": "red", "size": 1 }));
        assert!(manager.create("color", [&a]));
        assert!(!manager.create("color", [&a]));

        let b = Document::new("2", json!({ "color": "red" }));
        manager.on_insert(&b);
        assert_eq!(ids(manager.get("color").unwrap().lookup(&json!("red"))), vec!["1", "2"]);

        manager.on_update("2", &json!({ "color": "red" }), &json!({ "color": "blue" }));
        let color = manager.get("color").unwrap();
        assert_eq!(ids(color.lookup(&json!("red"))), vec!["1"]);
        assert_eq!(ids(color.lookup(&json!("blue"))), vec!["2"]);

        manager.on_delete(&a);
        let color = manager.get("color").unwrap();
        assert!(color.lookup(&json!("red")).is_none());
        assert_eq!(color.len(), 1);
    }

    #[test]
    fn test_update_to_non_scalar_removes_entry() {
        let mut manager = IndexManager::default();
        let a = Document::new("1", json!({ "tag": "x" }));
        manager.create("tag", [&a]);
        manager.on_update("1", &json!({ "tag": "x" }), &json!({ "tag": ["x"] }));
        assert!(manager.get("tag").unwrap().is_empty());
    }

    #[test]
    fn test_clear_entries_keeps_fields() {
        let a = Document::new("1", json!({ "k": 1 }));
        let mut manager = IndexManager::rebuild(&["k".to_string()], [&a]);
        manager.clear_entries();
        assert_eq!(manager.fields(), vec!["k".to_string()]);
        assert!(manager.get("k").unwrap().is_empty());
    }
}
