// Storage abstraction: one CRUD + pagination contract over two backends.
//
// - `embedded` keeps each collection in its own SQLite file under
//   `{root}/{database}.db/{collection}.table`.
// - `networked` talks to a MongoDB server through the official driver.
//
// Both adapters return identical document and pagination shapes, so nothing
// above this layer knows which one is active.

pub mod embedded;
pub mod networked;

pub use embedded::EmbeddedStore;
pub use networked::NetworkedStore;

use crate::config::{IdFormat, StoreConfig};
use crate::document::{Document, ID_FIELD};
use crate::error::Result;
use crate::query::{FindResult, Query, SortOrder};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Which kind of store a connection string selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Networked,
    Embedded,
}

impl BackendKind {
    /// `mongodb://` and `mongodb+srv://` select the networked store; anything
    /// else is treated as a filesystem root for the embedded store.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mongodb://") || url.starts_with("mongodb+srv://") {
            BackendKind::Networked
        } else {
            BackendKind::Embedded
        }
    }
}

/// A database-level handle. Implementations must be shareable across tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Get a handle to a named collection, creating its storage if needed.
    async fn collection(&self, name: &str) -> Result<Arc<dyn StorageCollection>>;

    /// Names of the collections currently present in the database.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Names of every database reachable through this connection.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Remove a collection and all its documents.
    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Release cached handles and connections.
    async fn close(&self) -> Result<()>;
}

/// CRUD over one collection.
#[async_trait]
pub trait StorageCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Number of documents matching `filter`.
    async fn count(&self, filter: &Document) -> Result<u64>;

    /// Two-pass find: count under the filter, then fetch the requested window.
    async fn find(&self, query: &Query) -> Result<FindResult>;

    /// Insert documents, assigning identifiers to those without one.
    /// Returns the documents as stored.
    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>>;

    /// Set the fields of `patch` on every matching document. The identifier
    /// is never rewritten. Returns the number of documents updated.
    async fn update_many(&self, filter: &Document, patch: &Document) -> Result<u64>;

    /// Delete every matching document. Returns the number deleted.
    async fn delete_many(&self, filter: &Document) -> Result<u64>;
}

/// Open the backend selected by `config.url`.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StorageBackend>> {
    match BackendKind::from_url(&config.url) {
        BackendKind::Networked => {
            log::info!("Connecting to networked store, database '{}'", config.database);
            let store = NetworkedStore::connect(&config.url, &config.database, config.id_format).await?;
            Ok(Arc::new(store))
        }
        BackendKind::Embedded => {
            log::info!(
                "Opening embedded store at '{}', database '{}'",
                config.url,
                config.database
            );
            let store = EmbeddedStore::open(&config.url, &config.database, config.id_format)?;
            Ok(Arc::new(store))
        }
    }
}

/// Give every document without an identifier one, following `format`.
///
/// `Number` continues from the highest numeric identifier in the collection
/// (`current_max`); `Text` draws a random 16-character identifier.
pub(crate) fn assign_ids(docs: &mut [Document], format: IdFormat, current_max: i64) {
    let mut next = current_max;
    for doc in docs.iter_mut() {
        if doc.get(ID_FIELD).map_or(false, |id| !id.is_null()) {
            if let Some(n) = doc.get(ID_FIELD).and_then(Value::as_i64) {
                next = next.max(n);
            }
            continue;
        }
        let id = match format {
            IdFormat::Number => {
                next += 1;
                Value::from(next)
            }
            IdFormat::Text => Value::String(nanoid::nanoid!(16)),
        };
        doc.insert(ID_FIELD.to_string(), id);
    }
}

/// Highest numeric identifier in a collection, or 0 when there is none.
/// Range operators only match within a type bracket, so the filter keeps
/// text identifiers (which sort above numbers) out of the result.
pub(crate) async fn max_numeric_id(collection: &dyn StorageCollection) -> Result<i64> {
    let mut numeric = Document::new();
    numeric.insert(ID_FIELD.to_string(), serde_json::json!({ "$gte": i64::MIN }));
    let query = Query::filter(numeric)
        .sorted(ID_FIELD, SortOrder::Desc)
        .paged(1, 1);
    let found = collection.find(&query).await?;
    Ok(found
        .documents
        .first()
        .and_then(|doc| doc.get(ID_FIELD))
        .and_then(Value::as_i64)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::as_document;
    use serde_json::json;

    #[test]
    fn test_backend_kind_from_url() {
        assert_eq!(BackendKind::from_url("mongodb://root:root@db:27017"), BackendKind::Networked);
        assert_eq!(BackendKind::from_url("mongodb+srv://cluster.example"), BackendKind::Networked);
        assert_eq!(BackendKind::from_url("./data"), BackendKind::Embedded);
        assert_eq!(BackendKind::from_url("/var/lib/mongodb"), BackendKind::Embedded);
    }

    #[test]
    fn test_assign_numeric_ids_continue_from_max() {
        let mut docs = vec![
            as_document(json!({"name": "a"})).unwrap(),
            as_document(json!({"name": "b", "_id": 10})).unwrap(),
            as_document(json!({"name": "c"})).unwrap(),
        ];
        assign_ids(&mut docs, IdFormat::Number, 3);
        assert_eq!(docs[0]["_id"], json!(4));
        assert_eq!(docs[1]["_id"], json!(10));
        assert_eq!(docs[2]["_id"], json!(11));
    }

    #[test]
    fn test_assign_text_ids() {
        let mut docs = vec![
            as_document(json!({"name": "a"})).unwrap(),
            as_document(json!({"name": "b", "_id": null})).unwrap(),
        ];
        assign_ids(&mut docs, IdFormat::Text, 0);
        let first = docs[0]["_id"].as_str().unwrap();
        let second = docs[1]["_id"].as_str().unwrap();
        assert_eq!(first.len(), 16);
        assert_ne!(first, second);
    }
}
