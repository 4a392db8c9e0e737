mod rack;

use crate::codec::{RackCodec, RACK_FILE_EXTENSION};
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{OpenDbsError, Result};
use crate::query::{self, Predicate};
use crate::schema::{RackKind, RackSchema};
use crate::search;
use parking_lot::RwLock;
use rack::Rack;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result count for `vector_search` when the caller gives no `k`.
pub const DEFAULT_VECTOR_K: usize = 10;

type RackHandle = Arc<RwLock<Rack>>;
type Racks = HashMap<String, RackHandle>;

/// The database engine.
/// Owns every database under one data root, keeps each rack's documents
/// and indexes in memory, and rewrites a rack's file after every mutation.
///
/// Mutations hold the rack's write lock across the document change, index
/// maintenance and file rewrite. The registry lock is never taken while a
/// rack lock is held.
pub struct Engine {
    config: EngineConfig,
    codec: RackCodec,
    databases: RwLock<HashMap<String, Racks>>,
}

impl Engine {
    /// Open the engine on a data root with default settings, loading every
    /// rack file found under it.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(EngineConfig::with_data_dir(data_dir))
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let codec = RackCodec::from_config(&config);
        let databases = load_databases(&config.data_dir, &codec)?;

        let rack_total: usize = databases.values().map(HashMap::len).sum();
        log::info!(
            "Loaded {} databases ({} racks) from {}",
            databases.len(),
            rack_total,
            config.data_dir.display()
        );

        Ok(Engine {
            config,
            codec,
            databases: RwLock::new(databases),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn database_path(&self, db: &str) -> PathBuf {
        self.config.data_dir.join(db)
    }

    fn rack_path(&self, db: &str, rack: &str) -> PathBuf {
        rack_file(&self.database_path(db), rack)
    }

    fn rack_handle(&self, db: &str, rack: &str) -> Result<RackHandle> {
        let databases = self.databases.read();
        let racks = databases
            .get(db)
            .ok_or_else(|| OpenDbsError::DatabaseNotFound(db.to_string()))?;
        racks
            .get(rack)
            .cloned()
            .ok_or_else(|| OpenDbsError::rack_not_found(db, rack))
    }

    /// Handle for read/mutate-if-exists operations, which treat a missing
    /// database or rack as an empty result.
    fn existing_rack(&self, db: &str, rack: &str) -> Option<RackHandle> {
        self.rack_handle(db, rack).ok()
    }

    /// Handles of a database's racks sorted by name. None if the database is missing.
    fn rack_handles(&self, db: &str) -> Option<Vec<(String, RackHandle)>> {
        let databases = self.databases.read();
        let racks = databases.get(db)?;
        let mut handles: Vec<(String, RackHandle)> = racks
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        Some(handles)
    }

    // ── Databases ──────────────────────────────────────────────────

    /// Register a database and create its directory. False if it exists.
    pub fn create_database(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Ok(false);
        }
        std::fs::create_dir_all(self.database_path(name))?;
        databases.insert(name.to_string(), HashMap::new());
        log::info!("Created database '{name}'");
        Ok(true)
    }

    /// Remove a database, its racks and its directory. False if absent.
    pub fn delete_database(&self, name: &str) -> Result<bool> {
        let removed = self.databases.write().remove(name);
        let Some(racks) = removed else {
            return Ok(false);
        };

        for handle in racks.values() {
            handle.write().dropped = true;
        }
        let path = self.database_path(name);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        log::info!("Deleted database '{name}' ({} racks)", racks.len());
        Ok(true)
    }

    /// Database names, sorted
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// `[{name, count}]` per rack; empty when the database is missing.
    pub fn database_racks(&self, db: &str) -> Vec<Value> {
        self.rack_handles(db)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, handle)| {
                let guard = handle.read();
                json!({ "name": name, "count": guard.documents.len() })
            })
            .collect()
    }

    /// `{totalRacks, totalDocuments, racks: [{name, type, count}]}`
    pub fn database_stats(&self, db: &str) -> Result<Value> {
        let handles = self
            .rack_handles(db)
            .ok_or_else(|| OpenDbsError::DatabaseNotFound(db.to_string()))?;

        let mut total_documents = 0;
        let mut racks = Vec::with_capacity(handles.len());
        for (name, handle) in &handles {
            let guard = handle.read();
            let count = guard.documents.len();
            total_documents += count;
            racks.push(json!({ "name": name, "type": guard.kind, "count": count }));
        }

        Ok(json!({
            "totalRacks": handles.len(),
            "totalDocuments": total_documents,
            "racks": racks,
        }))
    }

    /// `{databases, racks, documents}` across the whole engine.
    pub fn stats(&self) -> Value {
        let (database_count, handles): (usize, Vec<RackHandle>) = {
            let databases = self.databases.read();
            let handles = databases
                .values()
                .flat_map(|racks| racks.values().cloned())
                .collect();
            (databases.len(), handles)
        };

        let documents: usize = handles
            .iter()
            .map(|handle| handle.read().documents.len())
            .sum();

        json!({
            "databases": database_count,
            "racks": handles.len(),
            "documents": documents,
        })
    }

    // ── Racks ──────────────────────────────────────────────────────

    /// Create an empty rack and write its file. False if it exists.
    pub fn create_rack(
        &self,
        db: &str,
        rack: &str,
        kind: RackKind,
        schema: Option<RackSchema>,
    ) -> Result<bool> {
        validate_name(rack)?;
        let mut databases = self.databases.write();
        let racks = databases
            .get_mut(db)
            .ok_or_else(|| OpenDbsError::DatabaseNotFound(db.to_string()))?;
        if racks.contains_key(rack) {
            return Ok(false);
        }

        let new_rack = Rack::new(rack, self.rack_path(db, rack), kind, schema);
        new_rack.persist(&self.codec)?;
        racks.insert(rack.to_string(), Arc::new(RwLock::new(new_rack)));
        log::info!("Created {kind} rack '{db}/{rack}'");
        Ok(true)
    }

    /// Remove a rack and its file. False if the database or rack is absent.
    pub fn delete_rack(&self, db: &str, rack: &str) -> Result<bool> {
        let removed = self
            .databases
            .write()
            .get_mut(db)
            .and_then(|racks| racks.remove(rack));
        let Some(handle) = removed else {
            return Ok(false);
        };

        let path = {
            let mut guard = handle.write();
            guard.dropped = true;
            guard.path.clone()
        };
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        log::info!("Deleted rack '{db}/{rack}'");
        Ok(true)
    }

    /// Deep-copy a rack, documents and index contents included, into a new
    /// rack. False if the destination already exists.
    pub fn duplicate_rack(
        &self,
        src_db: &str,
        src_rack: &str,
        dst_db: &str,
        dst_rack: &str,
    ) -> Result<bool> {
        validate_name(dst_rack)?;
        let source = self.rack_handle(src_db, src_rack)?;
        let copy = {
            let guard = source.read();
            guard.duplicate(dst_rack, self.rack_path(dst_db, dst_rack))
        };

        let mut databases = self.databases.write();
        let racks = databases
            .get_mut(dst_db)
            .ok_or_else(|| OpenDbsError::DatabaseNotFound(dst_db.to_string()))?;
        if racks.contains_key(dst_rack) {
            return Ok(false);
        }

        copy.persist(&self.codec)?;
        log::info!(
            "Duplicated rack '{src_db}/{src_rack}' to '{dst_db}/{dst_rack}' ({} documents)",
            copy.documents.len()
        );
        racks.insert(dst_rack.to_string(), Arc::new(RwLock::new(copy)));
        Ok(true)
    }

    pub fn rack_type(&self, db: &str, rack: &str) -> Option<RackKind> {
        let handle = self.existing_rack(db, rack)?;
        let guard = handle.read();
        Some(guard.kind)
    }

    /// Document count, or None when the database or rack is missing.
    pub fn rack_count(&self, db: &str, rack: &str) -> Option<usize> {
        let handle = self.existing_rack(db, rack)?;
        let guard = handle.read();
        Some(guard.documents.len())
    }

    /// Remove every document, keeping the rack and its index definitions.
    pub fn clear_rack(&self, db: &str, rack: &str) -> Result<bool> {
        let Some(handle) = self.existing_rack(db, rack) else {
            return Ok(false);
        };
        let mut guard = handle.write();
        guard.clear();
        guard.persist(&self.codec)?;
        Ok(true)
    }

    // ── Indexes ────────────────────────────────────────────────────

    /// Build an equality index on `field`. True also when it already exists.
    pub fn create_index(&self, db: &str, rack: &str, field: &str) -> Result<bool> {
        let handle = self.rack_handle(db, rack)?;
        let mut guard = handle.write();
        let rack_state = &mut *guard;
        if !rack_state
            .indexes
            .create(field, rack_state.documents.values())
        {
            return Ok(true);
        }
        log::debug!(
            "Created index on '{field}' for rack '{db}/{rack}' ({} distinct values)",
            rack_state.indexes.get(field).map(|i| i.len()).unwrap_or(0)
        );
        rack_state.persist(&self.codec)?;
        Ok(true)
    }

    /// Remove an index. False if the field was not indexed.
    pub fn drop_index(&self, db: &str, rack: &str, field: &str) -> Result<bool> {
        let handle = self.rack_handle(db, rack)?;
        let mut guard = handle.write();
        if !guard.indexes.drop_index(field) {
            return Ok(false);
        }
        guard.persist(&self.codec)?;
        Ok(true)
    }

    pub fn indexed_fields(&self, db: &str, rack: &str) -> Result<Vec<String>> {
        let handle = self.rack_handle(db, rack)?;
        let guard = handle.read();
        Ok(guard.indexes.fields())
    }

    // ── Documents ──────────────────────────────────────────────────

    /// Insert a document under the next sequential id and return that id.
    /// `kind` tags the operation; SQL racks reject nosql-tagged inserts.
    pub fn insert(
        &self,
        db: &str,
        rack: &str,
        data: Value,
        kind: Option<RackKind>,
    ) -> Result<String> {
        let handle = self.rack_handle(db, rack)?;
        let mut guard = handle.write();
        guard.check_kind(kind)?;
        let data = guard.prepare(data)?;
        let id = guard.allocate_id()?;
        guard.put(&id, data)?;
        guard.persist(&self.codec)?;
        Ok(id)
    }

    /// Insert several documents with one file rewrite. Every item is
    /// validated first; if any fails, nothing is written.
    pub fn insert_many(&self, db: &str, rack: &str, items: Vec<Value>) -> Result<Vec<String>> {
        let handle = self.rack_handle(db, rack)?;
        let mut guard = handle.write();

        let prepared = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| guard.prepare(item).map_err(|e| tag_item_error(i, e)))
            .collect::<Result<Vec<Value>>>()?;

        let start = guard.next_id;
        let mut ids = Vec::with_capacity(prepared.len());
        for _ in 0..prepared.len() {
            match guard.allocate_id() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    guard.next_id = start;
                    return Err(e);
                }
            }
        }
        for (id, data) in ids.iter().zip(prepared) {
            guard.put(id, data)?;
        }
        guard.persist(&self.codec)?;
        Ok(ids)
    }

    /// Replace a document's data wholesale. False if the database, rack or
    /// document is missing.
    pub fn update(&self, db: &str, rack: &str, id: &str, data: Value) -> Result<bool> {
        let Some(handle) = self.existing_rack(db, rack) else {
            return Ok(false);
        };
        let mut guard = handle.write();
        if !guard.documents.contains_key(id) {
            return Ok(false);
        }
        let data = guard.prepare(data)?;
        guard.replace(id, data);
        guard.persist(&self.codec)?;
        Ok(true)
    }

    /// Update `id` if present, otherwise insert under `id`.
    /// Returns the id and whether a document was created.
    pub fn upsert(&self, db: &str, rack: &str, id: &str, data: Value) -> Result<(String, bool)> {
        if id.is_empty() {
            return Err(OpenDbsError::InvalidName(id.to_string()));
        }
        let handle = self.rack_handle(db, rack)?;
        let mut guard = handle.write();
        let data = guard.prepare(data)?;
        let created = if guard.documents.contains_key(id) {
            guard.replace(id, data);
            false
        } else {
            guard.put(id, data)?;
            true
        };
        guard.persist(&self.codec)?;
        Ok((id.to_string(), created))
    }

    /// Remove a document. False if the database, rack or document is missing.
    pub fn delete(&self, db: &str, rack: &str, id: &str) -> Result<bool> {
        let Some(handle) = self.existing_rack(db, rack) else {
            return Ok(false);
        };
        let mut guard = handle.write();
        if guard.remove(id).is_none() {
            return Ok(false);
        }
        guard.persist(&self.codec)?;
        Ok(true)
    }

    /// One document in result shape.
    pub fn get(&self, db: &str, rack: &str, id: &str) -> Option<Value> {
        let handle = self.existing_rack(db, rack)?;
        let guard = handle.read();
        guard
            .documents
            .get(id)
            .map(|doc| Value::Object(doc.to_result()))
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Parse `predicate` and run it. A malformed predicate is a `Parse` error;
    /// a missing database or rack yields no results.
    pub fn find(&self, db: &str, rack: &str, predicate: &Value, populate: bool) -> Result<Vec<Value>> {
        let predicate = Predicate::parse(predicate)?;
        Ok(self.find_with(db, rack, &predicate, populate))
    }

    pub fn find_with(&self, db: &str, rack: &str, predicate: &Predicate, populate: bool) -> Vec<Value> {
        let Some(handle) = self.existing_rack(db, rack) else {
            return Vec::new();
        };
        let mut results: Vec<Map<String, Value>> = {
            let guard = handle.read();
            let found = guard.find(predicate);
            found.into_iter().map(Document::to_result).collect()
        };

        // References resolve one rack at a time, after the queried rack's
        // lock is released.
        if populate {
            for result in &mut results {
                query::populate(result, |ref_rack, ref_id| self.lookup_document(db, ref_rack, ref_id));
            }
        }

        results.into_iter().map(Value::Object).collect()
    }

    fn lookup_document(&self, db: &str, rack: &str, id: &str) -> Option<Document> {
        let handle = self.existing_rack(db, rack)?;
        let guard = handle.read();
        guard.documents.get(id).cloned()
    }

    /// Documents whose string `field` scores at least `threshold` against `query`.
    pub fn fuzzy_search(
        &self,
        db: &str,
        rack: &str,
        field: &str,
        query: &str,
        threshold: f64,
    ) -> Vec<Value> {
        let Some(handle) = self.existing_rack(db, rack) else {
            return Vec::new();
        };
        let guard = handle.read();
        let found = search::fuzzy_matches(guard.documents.values(), field, query, threshold);
        found
            .into_iter()
            .map(|doc| Value::Object(doc.to_result()))
            .collect()
    }

    /// Top `k` documents by cosine similarity of `field` to `vector`, the
    /// score under `_metadata.score`.
    pub fn vector_search(
        &self,
        db: &str,
        rack: &str,
        field: &str,
        vector: &[f64],
        k: Option<usize>,
    ) -> Vec<Value> {
        let Some(handle) = self.existing_rack(db, rack) else {
            return Vec::new();
        };
        let guard = handle.read();
        let ranked = search::rank_by_cosine(
            guard.documents.values(),
            field,
            vector,
            k.unwrap_or(DEFAULT_VECTOR_K),
        );
        ranked
            .into_iter()
            .map(|(doc, score)| Value::Object(doc.to_scored_result(score)))
            .collect()
    }
}

fn tag_item_error(index: usize, err: OpenDbsError) -> OpenDbsError {
    match err {
        OpenDbsError::Validation(errors) => OpenDbsError::Validation(
            errors
                .into_iter()
                .map(|e| format!("item {index}: {e}"))
                .collect(),
        ),
        other => other,
    }
}

/// Names become path components, so anything that could escape the data
/// root is rejected.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(OpenDbsError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn rack_file(db_dir: &Path, rack: &str) -> PathBuf {
    db_dir.join(format!("{rack}.{RACK_FILE_EXTENSION}"))
}

/// One subdirectory per database, one `<rack>.odbs` file per rack.
fn load_databases(root: &Path, codec: &RackCodec) -> Result<HashMap<String, Racks>> {
    let mut databases = HashMap::new();

    for entry in std::fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry in {}: {}", root.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            log::warn!("Skipping database directory with non UTF-8 name: {}", path.display());
            continue;
        };

        let racks = load_racks(&path, codec)?;
        log::debug!("Loaded database '{name}' ({} racks)", racks.len());
        databases.insert(name, racks);
    }

    Ok(databases)
}

fn load_racks(db_dir: &Path, codec: &RackCodec) -> Result<Racks> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&db_dir.display().to_string()),
        RACK_FILE_EXTENSION
    );
    let files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| OpenDbsError::Config(format!("Glob error: {e}")))?
        .filter_map(|r| r.ok())
        .collect();

    let mut racks = HashMap::new();
    for file in files {
        let Some(name) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let bytes = match std::fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to read rack file {}: {}", file.display(), e);
                continue;
            }
        };
        match codec.decode(&bytes) {
            Ok(payload) => {
                let rack = Rack::from_payload(&name, file, payload);
                racks.insert(name, Arc::new(RwLock::new(rack)));
            }
            Err(e @ OpenDbsError::Corruption { .. }) => {
                log::error!("Rejected rack file {}: {}", file.display(), e);
            }
            Err(e) => {
                log::warn!("Skipping undecodable rack file {}: {}", file.display(), e);
            }
        }
    }

    Ok(racks)
}
