use crate::codec::{RackCodec, RackPayload};
use crate::document::{self, compare_ids, Document};
use crate::error::{OpenDbsError, Result};
use crate::index::IndexManager;
use crate::query::{Candidates, Predicate};
use crate::schema::{RackKind, RackSchema};
use crate::validation;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// In-memory state of one rack plus the file it persists to.
#[derive(Debug, Clone)]
pub(crate) struct Rack {
    pub name: String,
    pub path: PathBuf,
    pub kind: RackKind,
    pub schema: Option<RackSchema>,
    pub documents: HashMap<String, Document>,
    pub next_id: u64,
    pub indexes: IndexManager,
    pub created_at: DateTime<Utc>,
    /// Set once the rack is removed from the registry; persisting then
    /// becomes a no-op so a late writer cannot resurrect the file.
    pub dropped: bool,
}

impl Rack {
    pub fn new(name: &str, path: PathBuf, kind: RackKind, schema: Option<RackSchema>) -> Self {
        Rack {
            name: name.to_string(),
            path,
            kind,
            schema,
            documents: HashMap::new(),
            next_id: 1,
            indexes: IndexManager::default(),
            created_at: document::now(),
            dropped: false,
        }
    }

    /// Restore from a decoded file. Indexes are rebuilt from the documents.
    pub fn from_payload(name: &str, path: PathBuf, payload: RackPayload) -> Self {
        let documents: HashMap<String, Document> = payload
            .documents
            .into_values()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        let max_numeric = documents
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let next_id = payload.next_id.max(max_numeric.saturating_add(1));

        let indexes = IndexManager::rebuild(&payload.indexed_fields, documents.values());

        Rack {
            name: name.to_string(),
            path,
            kind: payload.kind,
            schema: payload.schema,
            documents,
            next_id,
            indexes,
            created_at: payload.created_at,
            dropped: false,
        }
    }

    pub fn to_payload(&self) -> RackPayload {
        RackPayload {
            documents: self
                .documents
                .iter()
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect(),
            next_id: self.next_id,
            indexed_fields: self.indexes.fields(),
            kind: self.kind,
            schema: self.schema.clone(),
            created_at: self.created_at,
        }
    }

    /// Rewrite the whole rack file.
    pub fn persist(&self, codec: &RackCodec) -> Result<()> {
        if self.dropped {
            return Ok(());
        }
        let bytes = codec.encode(&self.to_payload())?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, &bytes)?;
        log::debug!(
            "Persisted rack {} ({} bytes, {} documents)",
            self.path.display(),
            bytes.len(),
            self.documents.len()
        );
        Ok(())
    }

    /// SQL racks refuse operations explicitly tagged nosql.
    pub fn check_kind(&self, requested: Option<RackKind>) -> Result<()> {
        if self.kind == RackKind::Sql && requested == Some(RackKind::Nosql) {
            return Err(OpenDbsError::TypeMismatch {
                rack: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Apply schema defaults and validate. Without a schema any object passes.
    pub fn prepare(&self, mut data: Value) -> Result<Value> {
        match &self.schema {
            Some(schema) => validation::validate_and_prepare(schema, &mut data)?,
            None if !data.is_object() => {
                return Err(OpenDbsError::Parse(format!(
                    "document must be a JSON object, got {data}"
                )))
            }
            None => {}
        }
        Ok(data)
    }

    /// Take the next sequential id not already held by a document.
    pub fn allocate_id(&mut self) -> Result<String> {
        loop {
            let n = self.next_id;
            self.next_id = n.checked_add(1).ok_or_else(|| self.ids_exhausted())?;
            let id = n.to_string();
            if !self.documents.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Store a prepared document under `id` and index it, replacing any
    /// document already there. Keeps the id counter ahead of numeric ids
    /// chosen by callers; an id the counter cannot move past is refused.
    pub fn put(&mut self, id: &str, data: Value) -> Result<()> {
        if let Ok(n) = id.parse::<u64>() {
            if n >= self.next_id {
                self.next_id = n.checked_add(1).ok_or_else(|| self.ids_exhausted())?;
            }
        }
        self.remove(id);
        let doc = Document::new(id, data);
        self.indexes.on_insert(&doc);
        self.documents.insert(id.to_string(), doc);
        Ok(())
    }

    fn ids_exhausted(&self) -> OpenDbsError {
        OpenDbsError::IdsExhausted {
            rack: self.name.clone(),
        }
    }

    /// Replace a document's data wholesale. False if the id is absent.
    pub fn replace(&mut self, id: &str, data: Value) -> bool {
        let Some(doc) = self.documents.get_mut(id) else {
            return false;
        };
        let old = doc.replace_data(data);
        self.indexes.on_update(id, &old, &doc.data);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Document> {
        let doc = self.documents.remove(id)?;
        self.indexes.on_delete(&doc);
        Some(doc)
    }

    /// Drop every document; indexes stay defined but empty.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.indexes.clear_entries();
    }

    /// Documents matching `predicate`, in id order.
    pub fn find(&self, predicate: &Predicate) -> Vec<&Document> {
        let mut found: Vec<&Document> = match predicate.candidates(&self.indexes) {
            Candidates::All => self
                .documents
                .values()
                .filter(|doc| predicate.matches(doc))
                .collect(),
            Candidates::Ids(ids) => ids
                .iter()
                .filter_map(|id| self.documents.get(id))
                .filter(|doc| predicate.matches(doc))
                .collect(),
        };
        found.sort_by(|a, b| compare_ids(&a.id, &b.id));
        found
    }

    /// Deep copy under a new name and path. Shares nothing with `self`.
    pub fn duplicate(&self, name: &str, path: PathBuf) -> Self {
        Rack {
            name: name.to_string(),
            path,
            created_at: document::now(),
            dropped: false,
            ..self.clone()
        }
    }
}
