use crate::error::{OpenDbsError, Result};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One object-valued predicate operator
#[derive(Debug, Clone)]
pub enum Operator {
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Ne(Value),
    In(Value),
    Nin(Value),
    Regex(Regex),
    Exists(bool),
    /// An unrecognized `$` key: the whole operand object must equal the field.
    Equals(Value),
}

/// What a single predicate key requires of its field
#[derive(Debug, Clone)]
pub enum FieldPredicate {
    Equals(Value),
    Operators(Vec<Operator>),
}

/// A parsed query: a flat mapping of field name to field predicate.
/// Every term must hold for a document to match.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    terms: Vec<(String, FieldPredicate)>,
}

impl Predicate {
    /// Parse a predicate object. Object-valued terms are operator lists.
    pub fn parse(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            OpenDbsError::Parse(format!("predicate must be a JSON object, got {value}"))
        })?;

        let mut terms = Vec::with_capacity(obj.len());
        for (field, term) in obj {
            let predicate = match term {
                Value::Object(ops) => FieldPredicate::Operators(parse_operators(field, ops)?),
                other => FieldPredicate::Equals(other.clone()),
            };
            terms.push((field.clone(), predicate));
        }
        Ok(Predicate { terms })
    }

    pub fn parse_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| OpenDbsError::Parse(format!("predicate is not valid JSON: {e}")))?;
        Self::parse(&value)
    }

    /// `{field: {$gte: min, $lte: max}}`, either bound optional.
    pub fn range(field: &str, min: Option<Value>, max: Option<Value>) -> Self {
        let mut ops = Vec::new();
        if let Some(min) = min {
            ops.push(Operator::Gte(min));
        }
        if let Some(max) = max {
            ops.push(Operator::Lte(max));
        }
        Predicate {
            terms: vec![(field.to_string(), FieldPredicate::Operators(ops))],
        }
    }

    /// `{field: {$regex: pattern, $options: options}}`
    pub fn pattern(field: &str, pattern: &str, options: Option<&str>) -> Result<Self> {
        let regex = build_regex(field, pattern, options.unwrap_or(""))?;
        Ok(Predicate {
            terms: vec![(
                field.to_string(),
                FieldPredicate::Operators(vec![Operator::Regex(regex)]),
            )],
        })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[(String, FieldPredicate)] {
        &self.terms
    }

    /// Plain scalar equality terms on data fields: the ones an equality
    /// index can answer. The `id` key is excluded since it reads the
    /// document id, not its data.
    pub fn scalar_equalities(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.terms.iter().filter_map(|(field, term)| match term {
            FieldPredicate::Equals(value)
                if field != "id"
                    && matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) =>
            {
                Some((field.as_str(), value))
            }
            _ => None,
        })
    }
}

fn parse_operators(field: &str, ops: &Map<String, Value>) -> Result<Vec<Operator>> {
    let mut parsed = Vec::with_capacity(ops.len());
    let mut equals_whole = false;

    for (op, operand) in ops {
        let operator = match op.as_str() {
            "$gt" => Operator::Gt(operand.clone()),
            "$gte" => Operator::Gte(operand.clone()),
            "$lt" => Operator::Lt(operand.clone()),
            "$lte" => Operator::Lte(operand.clone()),
            "$ne" => Operator::Ne(operand.clone()),
            "$in" => Operator::In(operand.clone()),
            "$nin" => Operator::Nin(operand.clone()),
            "$exists" => match operand {
                Value::Bool(b) => Operator::Exists(*b),
                other => {
                    return Err(OpenDbsError::Parse(format!(
                        "$exists on '{field}' takes a boolean, got {other}"
                    )))
                }
            },
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    OpenDbsError::Parse(format!("$regex on '{field}' takes a string, got {operand}"))
                })?;
                let options = match ops.get("$options") {
                    None => "",
                    Some(Value::String(s)) => s.as_str(),
                    Some(other) => {
                        return Err(OpenDbsError::Parse(format!(
                            "$options on '{field}' takes a string, got {other}"
                        )))
                    }
                };
                Operator::Regex(build_regex(field, pattern, options)?)
            }
            // flags for $regex, read above
            "$options" => continue,
            _ => {
                if equals_whole {
                    continue;
                }
                equals_whole = true;
                Operator::Equals(Value::Object(ops.clone()))
            }
        };
        parsed.push(operator);
    }

    Ok(parsed)
}

fn build_regex(field: &str, pattern: &str, options: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| OpenDbsError::Parse(format!("invalid $regex on '{field}': {e}")))
}

impl FieldPredicate {
    /// Evaluate against a field's value (None when the field is absent).
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (FieldPredicate::Equals(expected), Some(actual)) => values_equal(actual, expected),
            (FieldPredicate::Equals(_), None) => false,
            (FieldPredicate::Operators(ops), Some(actual)) => {
                ops.iter().all(|op| op.matches(actual))
            }
            // Only an explicit `$exists: false` can hold for a missing field.
            (FieldPredicate::Operators(ops), None) => {
                !ops.is_empty() && ops.iter().all(|op| matches!(op, Operator::Exists(false)))
            }
        }
    }
}

impl Operator {
    fn matches(&self, actual: &Value) -> bool {
        match self {
            Operator::Gt(v) => compare(actual, v) == Some(Ordering::Greater),
            Operator::Gte(v) => matches!(compare(actual, v), Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt(v) => compare(actual, v) == Some(Ordering::Less),
            Operator::Lte(v) => matches!(compare(actual, v), Some(Ordering::Less | Ordering::Equal)),
            Operator::Ne(v) => !values_equal(actual, v),
            Operator::In(list) => list
                .as_array()
                .map(|items| items.iter().any(|item| values_equal(actual, item)))
                .unwrap_or(false),
            Operator::Nin(list) => list
                .as_array()
                .map(|items| !items.iter().any(|item| values_equal(actual, item)))
                .unwrap_or(false),
            Operator::Regex(re) => actual.as_str().map(|s| re.is_match(s)).unwrap_or(false),
            Operator::Exists(expected) => *expected,
            Operator::Equals(whole) => values_equal(actual, whole),
        }
    }
}

/// Structural equality with numbers compared by value (`28 == 28.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Numbers order numerically and strings lexicographically; any other
/// pairing is unordered.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn term(predicate: &Predicate, i: usize) -> &FieldPredicate {
        &predicate.terms()[i].1
    }

    #[test]
    fn test_parse_scalar_and_operators() {
        let p = Predicate::parse(&json!({ "name": "Alice", "age": { "$gte": 30, "$lt": 40 } })).unwrap();
        assert_eq!(p.terms().len(), 2);
        // serde_json maps are sorted, "age" first
        assert!(matches!(term(&p, 0), FieldPredicate::Operators(ops) if ops.len() == 2));
        assert!(matches!(term(&p, 1), FieldPredicate::Equals(v) if v == "Alice"));
    }

    #[test]
    fn test_non_object_predicate_rejected() {
        assert!(matches!(Predicate::parse(&json!([1])), Err(OpenDbsError::Parse(_))));
        assert!(matches!(Predicate::parse_str("{nope"), Err(OpenDbsError::Parse(_))));
    }

    #[test]
    fn test_comparison_operators() {
        let p = Predicate::parse(&json!({ "age": { "$gt": 30 } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!(35))));
        assert!(!term(&p, 0).matches(Some(&json!(30))));
        assert!(!term(&p, 0).matches(Some(&json!("35"))));

        let p = Predicate::parse(&json!({ "age": { "$lte": 30.0 } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!(30))));

        let p = Predicate::parse(&json!({ "name": { "$lt": "m" } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!("alice"))));
        assert!(!term(&p, 0).matches(Some(&json!("zed"))));
    }

    #[test]
    fn test_ne_in_nin() {
        let p = Predicate::parse(&json!({ "c": { "$ne": "red" } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!("blue"))));
        assert!(!term(&p, 0).matches(Some(&json!("red"))));

        let p = Predicate::parse(&json!({ "c": { "$in": ["red", 2] } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!(2.0))));
        assert!(!term(&p, 0).matches(Some(&json!("green"))));

        let p = Predicate::parse(&json!({ "c": { "$nin": ["red"] } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!("green"))));
        assert!(!term(&p, 0).matches(Some(&json!("red"))));

        let p = Predicate::parse(&json!({ "c": { "$in": "red" } })).unwrap();
        assert!(!term(&p, 0).matches(Some(&json!("red"))));
        let p = Predicate::parse(&json!({ "c": { "$nin": "red" } })).unwrap();
        assert!(!term(&p, 0).matches(Some(&json!("blue"))));
    }

    #[test]
    fn test_regex_with_options() {
        let p = Predicate::parse(&json!({ "name": { "$regex": "^ali", "$options": "i" } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!("Alice"))));
        assert!(!term(&p, 0).matches(Some(&json!("Malice"))));
        assert!(!term(&p, 0).matches(Some(&json!(5))));

        let p = Predicate::parse(&json!({ "name": { "$regex": "^ali" } })).unwrap();
        assert!(!term(&p, 0).matches(Some(&json!("Alice"))));
    }

    #[test]
    fn test_invalid_regex_is_parse_error() {
        assert!(matches!(
            Predicate::parse(&json!({ "name": { "$regex": "(" } })),
            Err(OpenDbsError::Parse(_))
        ));
    }

    #[test]
    fn test_exists() {
        let present = Predicate::parse(&json!({ "x": { "$exists": true } })).unwrap();
        assert!(term(&present, 0).matches(Some(&json!(null))));
        assert!(!term(&present, 0).matches(None));

        let absent = Predicate::parse(&json!({ "x": { "$exists": false } })).unwrap();
        assert!(term(&absent, 0).matches(None));
        assert!(!term(&absent, 0).matches(Some(&json!(1))));

        assert!(Predicate::parse(&json!({ "x": { "$exists": 1 } })).is_err());
    }

    #[test]
    fn test_missing_field_fails_other_operators() {
        let p = Predicate::parse(&json!({ "x": { "$ne": 1 } })).unwrap();
        assert!(!term(&p, 0).matches(None));
        let p = Predicate::parse(&json!({ "x": {} })).unwrap();
        assert!(!term(&p, 0).matches(None));
    }

    #[test]
    fn test_unknown_operator_compares_whole_object() {
        let p = Predicate::parse(&json!({ "addr": { "city": "Oslo" } })).unwrap();
        assert!(term(&p, 0).matches(Some(&json!({ "city": "Oslo" }))));
        assert!(!term(&p, 0).matches(Some(&json!({ "city": "Oslo", "zip": 1 }))));

        let p = Predicate::parse(&json!({ "n": { "$foo": 1 } })).unwrap();
        assert!(!term(&p, 0).matches(Some(&json!(1))));
    }

    #[test]
    fn test_scalar_equalities() {
        let p = Predicate::parse(&json!({
            "id": "1",
            "age": 28,
            "name": "A",
            "tags": ["x"],
            "n": null,
            "score": { "$gt": 1 }
        }))
        .unwrap();
        let eq: Vec<&str> = p.scalar_equalities().map(|(f, _)| f).collect();
        assert_eq!(eq, vec!["age", "name"]);
    }

    #[test]
    fn test_range_and_pattern_builders() {
        let p = Predicate::range("age", Some(json!(18)), Some(json!(30)));
        assert!(term(&p, 0).matches(Some(&json!(18))));
        assert!(term(&p, 0).matches(Some(&json!(30))));
        assert!(!term(&p, 0).matches(Some(&json!(31))));

        let p = Predicate::pattern("name", "BOB$", Some("i")).unwrap();
        assert!(term(&p, 0).matches(Some(&json!("bob"))));
    }

    #[test]
    fn test_values_equal() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!([1, {"a": 2}]), &json!([1.0, {"a": 2.0}])));
        assert!(!values_equal(&json!("1"), &json!(1)));
        assert!(!values_equal(&json!({"a": 1}), &json!({"b": 1})));
    }
}
