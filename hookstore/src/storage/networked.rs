use super::{assign_ids, max_numeric_id, BackendKind, StorageBackend, StorageCollection};
use crate::config::IdFormat;
use crate::document::{without_id, Document};
use crate::error::Result;
use crate::query::{FindResult, PaginationInfo, Query, Sort, SortOrder};
use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures_util::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use std::sync::Arc;

/// MongoDB-backed store. Filters and sorts are passed to the server as-is;
/// documents cross the boundary as relaxed extended JSON.
pub struct NetworkedStore {
    client: Client,
    db: Database,
    id_format: IdFormat,
}

impl NetworkedStore {
    pub async fn connect(url: &str, database: &str, id_format: IdFormat) -> Result<Self> {
        let options = ClientOptions::parse(url).await?;
        let client = Client::with_options(options)?;
        let db = client.database(database);
        Ok(NetworkedStore {
            client,
            db,
            id_format,
        })
    }
}

#[async_trait]
impl StorageBackend for NetworkedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Networked
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn StorageCollection>> {
        Ok(Arc::new(NetworkedCollection {
            name: name.to_string(),
            inner: self.db.collection::<BsonDocument>(name),
            id_format: self.id_format,
        }))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self.db.list_collection_names(None).await?;
        names.sort();
        Ok(names)
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let mut names = self.client.list_database_names(None, None).await?;
        names.sort();
        Ok(names)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.db.collection::<BsonDocument>(name).drop(None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

pub struct NetworkedCollection {
    name: String,
    inner: Collection<BsonDocument>,
    id_format: IdFormat,
}

/// JSON document to BSON for filters, patches and inserts.
pub fn to_bson_document(doc: &Document) -> Result<BsonDocument> {
    Ok(bson::to_document(doc)?)
}

/// Rewrite object-form `$or`/`$and` (`{"$or": {"a": 1, "b": 2}}`) into the
/// array form the server accepts, at every nesting level.
pub fn normalize_filter(filter: &Document) -> Document {
    filter
        .iter()
        .map(|(key, condition)| {
            let condition = match (key.as_str(), condition) {
                ("$or" | "$and", Value::Object(entries)) => Value::Array(
                    entries
                        .iter()
                        .map(|(field, value)| {
                            let mut single = Document::new();
                            single.insert(field.clone(), value.clone());
                            Value::Object(normalize_filter(&single))
                        })
                        .collect(),
                ),
                ("$or" | "$and", Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Object(sub) => Value::Object(normalize_filter(sub)),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                _ => condition.clone(),
            };
            (key.clone(), condition)
        })
        .collect()
}

/// Filter as the server expects it.
pub fn to_bson_filter(filter: &Document) -> Result<BsonDocument> {
    to_bson_document(&normalize_filter(filter))
}

/// BSON document back to JSON, using relaxed extended JSON for non-JSON types.
pub fn from_bson_document(doc: BsonDocument) -> Document {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

pub fn sort_document(sort: &Sort) -> BsonDocument {
    let direction = match sort.order {
        SortOrder::Asc => 1,
        SortOrder::Desc => -1,
    };
    let mut spec = BsonDocument::new();
    spec.insert(sort.field.clone(), direction);
    spec
}

/// `$set` update for a patch. The identifier is never rewritten.
pub fn set_document(patch: &Document) -> Result<Option<BsonDocument>> {
    let fields = without_id(patch);
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(doc! { "$set": to_bson_document(&fields)? }))
}

#[async_trait]
impl StorageCollection for NetworkedCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, filter: &Document) -> Result<u64> {
        Ok(self.inner.count_documents(to_bson_filter(filter)?, None).await?)
    }

    async fn find(&self, query: &Query) -> Result<FindResult> {
        let filter = to_bson_filter(&query.filter)?;
        let count = self.inner.count_documents(filter.clone(), None).await?;
        let pagination = PaginationInfo::compute(query.pagination.as_ref(), count);

        let mut options = FindOptions::default();
        options.sort = query.sort.as_ref().map(sort_document);
        if query.pagination.is_some() {
            options.skip = Some(pagination.skip);
            options.limit = Some(pagination.per_page as i64);
        }

        let cursor = self.inner.find(filter, options).await?;
        let rows: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(FindResult {
            documents: rows.into_iter().map(from_bson_document).collect(),
            pagination,
        })
    }

    async fn insert_many(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        if docs.is_empty() {
            return Ok(docs);
        }
        let current_max = match self.id_format {
            IdFormat::Number => max_numeric_id(self).await?,
            IdFormat::Text => 0,
        };
        assign_ids(&mut docs, self.id_format, current_max);

        let rows = docs
            .iter()
            .map(to_bson_document)
            .collect::<Result<Vec<_>>>()?;
        self.inner.insert_many(rows, None).await?;
        Ok(docs)
    }

    async fn update_many(&self, filter: &Document, patch: &Document) -> Result<u64> {
        let Some(update) = set_document(patch)? else {
            return self.count(filter).await;
        };
        let result = self
            .inner
            .update_many(to_bson_filter(filter)?, update, None)
            .await?;
        Ok(result.matched_count)
    }

    async fn delete_many(&self, filter: &Document) -> Result<u64> {
        let result = self.inner.delete_many(to_bson_filter(filter)?, None).await?;
        Ok(result.deleted_count)
    }
}
