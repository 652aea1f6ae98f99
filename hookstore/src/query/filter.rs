// In-process evaluation of the MongoDB-style filter subset.
// The networked adapter hands filters to the server; the embedded adapter uses this.

use crate::document::{lookup, Document};
use crate::error::{HookstoreError, Result};
use serde_json::Value;
use std::cmp::Ordering;

/// Check whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$or" => {
                let mut any = false;
                for sub in sub_filters("$or", condition)? {
                    if matches(doc, &sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$and" => {
                let mut all = true;
                for sub in sub_filters("$and", condition)? {
                    if !matches(doc, &sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            op if op.starts_with('$') => {
                return Err(HookstoreError::InvalidFilter(format!(
                    "unsupported top-level operator '{op}'"
                )));
            }
            field => field_matches(lookup(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `$or`/`$and` take either an array of filters or an object whose entries
/// are each treated as a one-field filter.
fn sub_filters(op: &str, condition: &Value) -> Result<Vec<Document>> {
    match condition {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(HookstoreError::InvalidFilter(format!(
                    "{op} entries must be objects, got {other}"
                ))),
            })
            .collect(),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| {
                let mut single = Document::new();
                single.insert(k.clone(), v.clone());
                single
            })
            .collect()),
        other => Err(HookstoreError::InvalidFilter(format!(
            "{op} expects an array or object, got {other}"
        ))),
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool> {
    let operators = match condition {
        Value::Object(map) if is_operator_object(condition) => map,
        _ => return Ok(equals(value, condition)),
    };

    for (op, arg) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(value, arg),
            "$ne" => !equals(value, arg),
            "$gt" => compares(value, arg, |o| o == Ordering::Greater),
            "$gte" => compares(value, arg, |o| o != Ordering::Less),
            "$lt" => compares(value, arg, |o| o == Ordering::Less),
            "$lte" => compares(value, arg, |o| o != Ordering::Greater),
            "$in" => in_list(op, value, arg)?,
            "$nin" => !in_list(op, value, arg)?,
            "$exists" => {
                let wanted = arg.as_bool().ok_or_else(|| {
                    HookstoreError::InvalidFilter(format!("$exists expects a boolean, got {arg}"))
                })?;
                value.is_some() == wanted
            }
            other => {
                return Err(HookstoreError::InvalidFilter(format!(
                    "unsupported operator '{other}'"
                )));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(op: &str, value: Option<&Value>, arg: &Value) -> Result<bool> {
    let candidates = arg.as_array().ok_or_else(|| {
        HookstoreError::InvalidFilter(format!("{op} expects an array, got {arg}"))
    })?;
    Ok(candidates.iter().any(|candidate| equals(value, candidate)))
}

/// Equality with array containment: `{tags: "a"}` matches `tags: ["a", "b"]`.
/// A null target also matches a missing field.
fn equals(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(Value::Array(items)) if !target.is_array() => {
            items.iter().any(|item| values_equal(item, target))
        }
        Some(v) => values_equal(v, target),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(Some(a), Some(b)) == Ordering::Equal,
        _ => a == b,
    }
}

/// Range comparisons only apply within the same type bracket (numbers with
/// numbers, strings with strings). Array fields match if any element does.
fn compares(value: Option<&Value>, arg: &Value, accept: impl Fn(Ordering) -> bool + Copy) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(|item| compares(Some(item), arg, accept)),
        Some(v) if type_rank(Some(v)) == type_rank(Some(arg)) && !v.is_null() => {
            accept(compare_values(Some(v), Some(arg)))
        }
        _ => false,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: missing/null < numbers < strings < objects
/// < arrays < booleans.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => {
                let (fx, fy) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(left), Some(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::as_document;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        as_document(value).unwrap()
    }

    fn check(d: &Value, f: Value) -> bool {
        matches(&doc(d.clone()), &doc(f)).unwrap()
    }

    #[test]
    fn test_equality_and_missing() {
        let d = json!({"name": "Guy", "age": 30, "nick": null});
        assert!(check(&d, json!({})));
        assert!(check(&d, json!({"name": "Guy"})));
        assert!(!check(&d, json!({"name": "Alice"})));
        assert!(check(&d, json!({"age": 30.0})));
        assert!(check(&d, json!({"missing": null})));
        assert!(check(&d, json!({"nick": null})));
    }

    #[test]
    fn test_array_containment() {
        let d = json!({"authors": [1, 2]});
        assert!(check(&d, json!({"authors": 2})));
        assert!(!check(&d, json!({"authors": 3})));
        assert!(check(&d, json!({"authors": [1, 2]})));
    }

    #[test]
    fn test_range_operators() {
        let d = json!({"created_at": "2021-05-01", "n": 5});
        assert!(check(&d, json!({"created_at": {"$gt": "1980-01-01"}})));
        assert!(!check(&d, json!({"created_at": {"$lt": "1980-01-01"}})));
        assert!(check(&d, json!({"n": {"$gte": 5, "$lte": 5}})));
        assert!(!check(&d, json!({"n": {"$gt": "4"}})), "no cross-type comparison");
        assert!(!check(&d, json!({"missing": {"$lt": 10}})));
    }

    #[test]
    fn test_set_operators() {
        let d = json!({"sex": "male"});
        assert!(check(&d, json!({"sex": {"$in": ["male", "female"]}})));
        assert!(!check(&d, json!({"sex": {"$nin": ["male"]}})));
        assert!(check(&d, json!({"sex": {"$ne": "female"}})));
        assert!(check(&d, json!({"sex": {"$exists": true}})));
        assert!(check(&d, json!({"age": {"$exists": false}})));
    }

    #[test]
    fn test_or_array_and_object_forms() {
        let d = json!({"created_at": "1970-01-01", "updated_at": "2020-01-01"});
        assert!(check(
            &d,
            json!({"$or": [{"created_at": {"$gt": "1980-01-01"}}, {"updated_at": {"$exists": true}}]})
        ));
        assert!(check(
            &d,
            json!({"$or": {"created_at": {"$gt": "1980-01-01"}, "updated_at": {"$exists": true}}})
        ));
        assert!(!check(&d, json!({"$or": [{"created_at": "x"}, {"updated_at": "y"}]})));
        assert!(!check(&d, json!({"$and": [{"created_at": "1970-01-01"}, {"updated_at": "y"}]})));
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        let d = doc(json!({"a": 1}));
        assert!(matches(&d, &doc(json!({"a": {"$regex": "x"}}))).is_err());
        assert!(matches(&d, &doc(json!({"$where": "1"}))).is_err());
        assert!(matches(&d, &doc(json!({"a": {"$in": 1}}))).is_err());
    }

    #[test]
    fn test_compare_values_order() {
        let mut values = vec![json!(true), json!("b"), json!(10), Value::Null, json!([1]), json!(2), json!("a")];
        values.sort_by(|a, b| compare_values(Some(a), Some(b)));
        assert_eq!(
            values,
            vec![Value::Null, json!(2), json!(10), json!("a"), json!("b"), json!([1]), json!(true)]
        );
        assert_eq!(compare_values(None, Some(&json!(0))), Ordering::Less);
    }
}
