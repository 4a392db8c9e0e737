//! Lexical fuzzy matching and cosine-similarity vector ranking.
//!
//! The fuzzy score is not an edit distance. After lowercasing both strings:
//! - equal strings score 1.0
//! - an empty string (on either side) scores 0.0
//! - when the shorter string is contained in the longer one, as a substring
//!   or more generally as an in-order subsequence of its characters, 0.8
//! - otherwise |chars(a) ∩ chars(b)| / max(|chars(a)|, |chars(b)|) over the
//!   sets of distinct characters
//!
//! Counting subsequences as containment raises scores for non-contiguous
//! matches compared with a substring-only rule: "ace" against "abcde"
//! scores 0.8 here, where substring containment alone would fall through
//! to the character overlap and give 0.6. Thresholds tuned against a
//! substring-only scorer will admit more of these matches.

use crate::document::{compare_ids, Document};
use serde_json::Value;
use std::collections::HashSet;

pub const CONTAINMENT_SCORE: f64 = 0.8;

/// Fuzzy similarity of `query` against `text`, in [0, 1].
pub fn similarity(query: &str, text: &str) -> f64 {
    let a = query.to_lowercase();
    let b = text.to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (longer, shorter) = if a.chars().count() > b.chars().count() {
        (&a, &b)
    } else {
        (&b, &a)
    };
    if contains_in_order(longer, shorter) {
        return CONTAINMENT_SCORE;
    }

    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    let shared = set_a.intersection(&set_b).count();
    shared as f64 / set_a.len().max(set_b.len()) as f64
}

/// True when every char of `needle` appears in `haystack` in order.
/// Covers plain substrings.
fn contains_in_order(haystack: &str, needle: &str) -> bool {
    if haystack.contains(needle) {
        return true;
    }
    let mut chars = haystack.chars();
    needle.chars().all(|c| chars.any(|h| h == c))
}

/// Documents whose `field` is a string scoring at least `threshold`
/// against `query`, in id order.
pub fn fuzzy_matches<'a, I>(documents: I, field: &str, query: &str, threshold: f64) -> Vec<&'a Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut matches: Vec<&Document> = documents
        .into_iter()
        .filter(|doc| {
            doc.field(field)
                .and_then(Value::as_str)
                .map(|text| similarity(query, text) >= threshold)
                .unwrap_or(false)
        })
        .collect();
    matches.sort_by(|a, b| compare_ids(&a.id, &b.id));
    matches
}

/// dot(a, b) / (|a| * |b|). Zero when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    dot / magnitude
}

/// A JSON array of numbers as a vector. None for anything else.
pub fn as_vector(value: &Value) -> Option<Vec<f64>> {
    value
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()
}

/// Top `k` documents by cosine similarity of `field` to `query`.
/// Only numeric arrays of the query's length are considered. Ties keep id order.
pub fn rank_by_cosine<'a, I>(documents: I, field: &str, query: &[f64], k: usize) -> Vec<(&'a Document, f64)>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut scored: Vec<(&Document, f64)> = documents
        .into_iter()
        .filter_map(|doc| {
            let vector = doc.field(field).and_then(as_vector)?;
            (vector.len() == query.len()).then(|| (doc, cosine_similarity(query, &vector)))
        })
        .collect();

    scored.sort_by(|(da, sa), (db, sb)| {
        sb.total_cmp(sa).then_with(|| compare_ids(&da.id, &db.id))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_match_is_one() {
        assert_eq!(similarity("Alice", "alice"), 1.0);
    }

    #[test]
    fn test_substring_is_point_eight() {
        assert_eq!(similarity("char", "Charlie Brown"), CONTAINMENT_SCORE);
        assert_eq!(similarity("Charlie Brown", "brown"), CONTAINMENT_SCORE);
    }

    #[test]
    fn test_prefix_typo_still_contained() {
        // every letter of "charle" appears in order in "charlie brown"
        assert!(similarity("Charle", "Charlie Brown") >= 0.7);
    }

    #[test]
    fn test_scattered_subsequence_scores_as_containment() {
        assert_eq!(similarity("ace", "abcde"), CONTAINMENT_SCORE);
        // out of order: falls back to overlap, {a,c,e} of {a,b,c,d,e}
        let score = similarity("eca", "abcde");
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_char_overlap() {
        // {a,b,c} vs {c,b,x}: shared {b,c}, max size 3
        let score = similarity("abc", "cbx");
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_empty_strings() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "abc"), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_cosine_examples() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[3.0, 4.0]), 0.0);
        assert_eq!(cosine_similarity(&[3.0, 4.0], &[0.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_as_vector() {
        assert_eq!(as_vector(&json!([1, 2.5])), Some(vec![1.0, 2.5]));
        assert_eq!(as_vector(&json!([1, "x"])), None);
        assert_eq!(as_vector(&json!("1,2")), None);
    }

    #[test]
    fn test_fuzzy_matches_skips_non_strings() {
        let docs = vec![
            Document::new("2", json!({ "name": "Charlie Brown" })),
            Document::new("1", json!({ "name": "charlie" })),
            Document::new("3", json!({ "name": 7 })),
            Document::new("4", json!({ "title": "Charlie" })),
        ];
        let found: Vec<&str> = fuzzy_matches(&docs, "name", "Charlie", 0.7)
            .into_iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(found, vec!["1", "2"]);
    }

    #[test]
    fn test_rank_by_cosine() {
        let docs = vec![
            Document::new("1", json!({ "v": [0, 1] })),
            Document::new("2", json!({ "v": [1, 0] })),
            Document::new("3", json!({ "v": [1, 1] })),
            Document::new("4", json!({ "v": [1, 0, 0] })),
            Document::new("5", json!({ "v": "nope" })),
            Document::new("6", json!({ "v": [0, 0] })),
        ];
        let ranked = rank_by_cosine(&docs, "v", &[1.0, 0.0], 10);
        let ids: Vec<&str> = ranked.iter().map(|(d, _)| d.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1", "6"]);
        assert_eq!(ranked[0].1, 1.0);

        let top1 = rank_by_cosine(&docs, "v", &[1.0, 0.0], 1);
        assert_eq!(top1.len(), 1);
        assert_eq!(top1[0].0.id, "2");
    }
}
