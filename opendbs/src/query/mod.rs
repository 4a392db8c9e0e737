//! Predicate evaluation over a rack's documents.
//!
//! `find` runs in two passes. Plain scalar equality terms on indexed fields
//! narrow the candidate id set first; the full predicate then filters the
//! candidates (or every document, when no index applied).

mod predicate;

pub use predicate::{compare, values_equal, FieldPredicate, Operator, Predicate};

use crate::document::Document;
use crate::index::IndexManager;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Outcome of the index pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    /// No indexed equality term applied; scan everything.
    All,
    /// Only these ids can match. Empty means nothing can.
    Ids(HashSet<String>),
}

impl Predicate {
    /// True if the document satisfies every term. `id` is read from the
    /// document id, every other key from its data.
    pub fn matches(&self, doc: &Document) -> bool {
        self.terms().iter().all(|(field, term)| {
            if field == "id" {
                term.matches(Some(&Value::String(doc.id.clone())))
            } else {
                term.matches(doc.field(field))
            }
        })
    }

    /// Intersect the id sets of every indexed scalar equality term.
    pub fn candidates(&self, indexes: &IndexManager) -> Candidates {
        let mut narrowed: Option<HashSet<String>> = None;

        for (field, value) in self.scalar_equalities() {
            let Some(index) = indexes.get(field) else {
                continue;
            };
            let Some(ids) = index.lookup(value) else {
                return Candidates::Ids(HashSet::new());
            };
            narrowed = Some(match narrowed {
                None => ids.clone(),
                Some(current) => current.intersection(ids).cloned().collect(),
            });
            if narrowed.as_ref().map(HashSet::is_empty).unwrap_or(false) {
                return Candidates::Ids(HashSet::new());
            }
        }

        match narrowed {
            Some(ids) => Candidates::Ids(ids),
            None => Candidates::All,
        }
    }
}

/// Split a `"<rack>:<id>"` reference. Strings containing "http" are never
/// references, so URLs pass through untouched.
pub fn parse_reference(value: &str) -> Option<(&str, &str)> {
    if !value.contains(':') || value.contains("http") {
        return None;
    }
    let mut parts = value.split(':');
    let rack = parts.next()?;
    let id = parts.next()?;
    Some((rack, id))
}

/// Replace every top-level reference-shaped string field of `result` with
/// the referenced document, as `{id, ...its data}`. `resolve` looks a
/// reference up and returns None when the rack or document is missing.
/// Substituted documents are not themselves populated.
pub fn populate<F>(result: &mut Map<String, Value>, mut resolve: F)
where
    F: FnMut(&str, &str) -> Option<Document>,
{
    for value in result.values_mut() {
        let Value::String(text) = value else {
            continue;
        };
        let Some((rack, id)) = parse_reference(text) else {
            continue;
        };
        if let Some(referenced) = resolve(rack, id) {
            *value = Value::Object(referenced_view(&referenced));
        }
    }
}

fn referenced_view(doc: &Document) -> Map<String, Value> {
    let mut obj = Map::new();
    if let Some(fields) = doc.data.as_object() {
        for (k, v) in fields {
            obj.insert(k.clone(), v.clone());
        }
    }
    obj.insert("id".into(), Value::String(doc.id.clone()));
    obj
}
