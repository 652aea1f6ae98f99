use crate::document::{document_id, merge_for_insert, without_id, Document, ID_FIELD};
use crate::engine::{CompiledSchema, Verdict, WriteTarget};
use crate::error::Result;
use crate::query::{FindResult, Query};
use crate::schema::Schema;
use crate::storage::{StorageBackend, StorageCollection};
use crate::validation::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Why one record of a write was not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    /// Position in the insert batch, or among the records an update matched.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub errors: Vec<ValidationError>,
}

/// What an upsert ended up doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "documents", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// Nothing matched; these records were inserted (empty if rejected).
    Inserted(Vec<Document>),
    /// These previously stored records were updated.
    Updated(Vec<Document>),
}

/// A storage collection with a compiled schema interposed on every write.
///
/// Writes accept what they can and record the rest; `errors()` reports the
/// rejected records of the most recent write.
pub struct ValidatedCollection {
    backend: Arc<dyn StorageBackend>,
    collection: Arc<dyn StorageCollection>,
    compiled: Arc<CompiledSchema>,
    last_errors: Mutex<Vec<RecordError>>,
}

impl ValidatedCollection {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        collection: Arc<dyn StorageCollection>,
        compiled: Arc<CompiledSchema>,
    ) -> Self {
        ValidatedCollection {
            backend,
            collection,
            compiled,
            last_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    pub fn schema(&self) -> &Schema {
        self.compiled.schema()
    }

    /// Rejected records of the last insert, update or upsert.
    pub fn errors(&self) -> Vec<RecordError> {
        self.last_errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }

    fn set_errors(&self, errors: Vec<RecordError>) {
        if let Ok(mut slot) = self.last_errors.lock() {
            *slot = errors;
        }
    }

    fn target(&self) -> WriteTarget<'_> {
        WriteTarget {
            collection: self.collection.as_ref(),
            backend: self.backend.as_ref(),
        }
    }

    /// Validate and store each record in turn. Accepted records are written
    /// immediately, so later records of the batch see them (for `unique` and
    /// `increment`). Returns the stored documents.
    pub async fn insert(&self, records: Vec<Document>) -> Result<Vec<Document>> {
        let mut inserted = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let id = document_id(&record).cloned();
            match self.compiled.validate_insert(self.target(), record).await? {
                Ok(doc) => {
                    let stored = self.collection.insert_many(vec![doc]).await?;
                    log::debug!("Inserted record {index} into '{}'", self.name());
                    inserted.extend(stored);
                }
                Err(errors) => {
                    log::warn!(
                        "Rejected record {index} for '{}': {} error(s)",
                        self.name(),
                        errors.len()
                    );
                    rejected.push(RecordError { index, id, errors });
                }
            }
        }

        self.set_errors(rejected);
        Ok(inserted)
    }

    /// Insert a single record, returning it as stored or its errors.
    pub async fn insert_one(&self, record: Document) -> Result<Verdict> {
        let mut inserted = self.insert(vec![record]).await?;
        match inserted.pop() {
            Some(doc) => Ok(Ok(doc)),
            None => Ok(Err(self
                .errors()
                .into_iter()
                .flat_map(|e| e.errors)
                .collect())),
        }
    }

    /// Validate `patch` against every matching record and apply it to each
    /// one that passes. Returns the matched records as they were before the
    /// update. Already applied updates are not rolled back when a later one
    /// is rejected.
    pub async fn update(&self, filter: &Document, patch: &Document) -> Result<Vec<Document>> {
        let patch = without_id(patch);
        let matched = self.collection.find(&Query::filter(filter.clone())).await?;

        let mut previous_docs = Vec::new();
        let mut rejected = Vec::new();
        for (index, previous) in matched.documents.into_iter().enumerate() {
            let id = document_id(&previous).cloned();
            match self
                .compiled
                .validate_update(self.target(), &previous, patch.clone())
                .await?
            {
                Ok(accepted) => {
                    let mut by_id = Document::new();
                    by_id.insert(ID_FIELD.to_string(), id.clone().unwrap_or(Value::Null));
                    self.collection.update_many(&by_id, &accepted).await?;
                    previous_docs.push(previous);
                }
                Err(errors) => {
                    log::warn!(
                        "Rejected update of record {index} in '{}': {} error(s)",
                        self.name(),
                        errors.len()
                    );
                    rejected.push(RecordError { index, id, errors });
                }
            }
        }

        self.set_errors(rejected);
        Ok(previous_docs)
    }

    /// Update the matching records, or insert `filter` merged with `data`
    /// (identifier and operator conditions excluded) when nothing matches.
    pub async fn upsert(&self, filter: &Document, data: &Document) -> Result<UpsertOutcome> {
        if self.collection.count(filter).await? == 0 {
            let record = merge_for_insert(filter, data);
            return Ok(UpsertOutcome::Inserted(self.insert(vec![record]).await?));
        }
        Ok(UpsertOutcome::Updated(self.update(filter, data).await?))
    }

    pub async fn find(&self, query: &Query) -> Result<FindResult> {
        self.collection.find(query).await
    }

    pub async fn count(&self, filter: &Document) -> Result<u64> {
        self.collection.count(filter).await
    }

    /// Delete matching records, returning them as they were.
    pub async fn delete(&self, filter: &Document) -> Result<Vec<Document>> {
        let previous = self.collection.find(&Query::filter(filter.clone())).await?;
        let deleted = self.collection.delete_many(filter).await?;
        log::debug!("Deleted {deleted} record(s) from '{}'", self.name());
        Ok(previous.documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdFormat;
    use crate::document::as_document;
    use crate::engine::{EngineConfig, ValidationEngine};
    use crate::hooks::HookRegistry;
    use crate::schema::parse_schema_str;
    use crate::storage::EmbeddedStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    const BOOKS: &str = r#"
properties:
  title: { type: string, minLength: 1 }
  stock: { type: integer, minimum: 0 }
required: [title]
updating:
  _id: { type: increment }
  title: { type: unique }
"#;

    async fn books(tmp: &TempDir) -> ValidatedCollection {
        let store: Arc<dyn StorageBackend> =
            Arc::new(EmbeddedStore::open(tmp.path().to_str().unwrap(), "shop", IdFormat::Text).unwrap());
        let collection = store.collection("books").await.unwrap();
        let engine = ValidationEngine::new(Arc::new(HookRegistry::standard()), EngineConfig::default());
        let compiled = engine.compile(&parse_schema_str(BOOKS).unwrap()).unwrap();
        ValidatedCollection::new(store, collection, Arc::new(compiled))
    }

    fn doc(value: Value) -> Document {
        as_document(value).unwrap()
    }

    #[tokio::test]
    async fn test_insert_batch_keeps_valid_records() {
        let tmp = TempDir::new().unwrap();
        let books = books(&tmp).await;

        let inserted = books
            .insert(vec![
                doc(json!({"title": "Dune", "stock": 3})),
                doc(json!({"stock": 1})),
                doc(json!({"title": "Dune"})),
                doc(json!({"title": "Emma"})),
            ])
            .await
            .unwrap();

        let ids: Vec<&Value> = inserted.iter().map(|d| &d["_id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2)]);

        let errors = books.errors();
        let indexes: Vec<usize> = errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert!(matches!(errors[1].errors[0], ValidationError::Hook { ref hook, .. } if hook == "unique"));
        assert_eq!(books.count(&Document::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_one() {
        let tmp = TempDir::new().unwrap();
        let books = books(&tmp).await;
        let stored = books.insert_one(doc(json!({"title": "Dune"}))).await.unwrap().unwrap();
        assert_eq!(stored["_id"], json!(1));

        let errors = books.insert_one(doc(json!({"title": ""}))).await.unwrap().unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_update_returns_previous_and_reports_rejections() {
        let tmp = TempDir::new().unwrap();
        let books = books(&tmp).await;
        books
            .insert(vec![
                doc(json!({"title": "Dune", "stock": 3})),
                doc(json!({"title": "Emma", "stock": 0})),
            ])
            .await
            .unwrap();

        let previous = books
            .update(&doc(json!({})), &doc(json!({"stock": 5, "_id": 99})))
            .await
            .unwrap();
        assert_eq!(previous.len(), 2);
        assert_eq!(previous[0]["stock"], json!(3));
        let found = books.find(&Query::default()).await.unwrap();
        assert!(found.documents.iter().all(|d| d["stock"] == json!(5)));
        assert!(found.documents.iter().all(|d| d["_id"] != json!(99)));

        // renaming both to the same title: the first update applies, then
        // the second collides with it
        let previous = books
            .update(&doc(json!({})), &doc(json!({"title": "Dune"})))
            .await
            .unwrap();
        assert_eq!(previous.len(), 1);
        let errors = books.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
        assert_eq!(errors[0].id, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let tmp = TempDir::new().unwrap();
        let books = books(&tmp).await;

        let filter = doc(json!({"title": "Dune", "_id": 7, "stock": {"$gt": 0}}));
        match books.upsert(&filter, &doc(json!({"stock": 2}))).await.unwrap() {
            UpsertOutcome::Inserted(docs) => {
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0]["title"], json!("Dune"));
                assert_eq!(docs[0]["_id"], json!(1));
            }
            other => panic!("expected insert, got {other:?}"),
        }

        match books
            .upsert(&doc(json!({"title": "Dune"})), &doc(json!({"stock": 4})))
            .await
            .unwrap()
        {
            UpsertOutcome::Updated(previous) => assert_eq!(previous[0]["stock"], json!(2)),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_returns_removed_records() {
        let tmp = TempDir::new().unwrap();
        let books = books(&tmp).await;
        books
            .insert(vec![doc(json!({"title": "Dune"})), doc(json!({"title": "Emma"}))])
            .await
            .unwrap();

        let removed = books.delete(&doc(json!({"title": "Emma"}))).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0]["title"], json!("Emma"));
        assert_eq!(books.count(&Document::new()).await.unwrap(), 1);
    }
}
