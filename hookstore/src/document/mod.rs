// Document model - ordered JSON field maps with a reserved identifier

use serde_json::{Map, Value};

/// Reserved identifier field, unique within a collection and immutable once assigned.
pub const ID_FIELD: &str = "_id";

/// A stored record. Field order is preserved (serde_json `preserve_order`).
pub type Document = Map<String, Value>;

/// Return the identifier of a document, if it has one.
pub fn document_id(doc: &Document) -> Option<&Value> {
    doc.get(ID_FIELD)
}

/// Interpret a JSON value as a document. Non-objects yield `None`.
pub fn as_document(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// A field counts as absent when it is missing or explicitly null.
pub fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Merge `data` over `filter` for an upsert that found nothing to update.
///
/// The identifier is never carried over, and neither are operator keys or
/// operator-valued conditions (`{"age": {"$gt": 3}}`), since those describe a
/// match rather than a value.
pub fn merge_for_insert(filter: &Document, data: &Document) -> Document {
    let mut merged = Document::new();
    for (key, value) in filter.iter().chain(data.iter()) {
        if key == ID_FIELD || key.starts_with('$') || is_operator_object(value) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Copy of `doc` without the identifier field.
pub fn without_id(doc: &Document) -> Document {
    doc.iter()
        .filter(|(key, _)| key.as_str() != ID_FIELD)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Look up a possibly dotted path (`address.city`) inside a document.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
