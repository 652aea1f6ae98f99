use crate::collection::ValidatedCollection;
use crate::config::StoreConfig;
use crate::document::{as_document, Document};
use crate::engine::{CompiledSchema, EngineConfig, ValidationEngine};
use crate::error::{HookstoreError, Result};
use crate::hooks::HookRegistry;
use crate::query::Query;
use crate::schema::{parse_schema_value, Schema, SchemaRecord};
use crate::storage::{self, StorageBackend};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Where `Store::model` takes a collection's schema from.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// Accept any document, run no hooks.
    Open,
    /// Use this schema as given.
    Literal(Schema),
    /// Look up the record named after the collection in this registry
    /// collection, falling back to `Open` when there is none.
    Registry(String),
}

/// The main entry point for hookstore.
/// Holds one backend connection and one validation engine, and hands out
/// validated collection handles.
pub struct Store {
    config: StoreConfig,
    backend: Arc<dyn StorageBackend>,
    engine: ValidationEngine,
    compiled: Mutex<HashMap<(String, String), Arc<CompiledSchema>>>,
}

impl Store {
    /// Connect with the standard hooks.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        Self::connect_with_hooks(config, HookRegistry::standard()).await
    }

    /// Connect with a caller-assembled hook registry.
    pub async fn connect_with_hooks(config: StoreConfig, registry: HookRegistry) -> Result<Self> {
        if config.schema_collection.is_empty() {
            return Err(HookstoreError::Config("schema_collection must not be empty".into()));
        }
        let backend = storage::connect(&config).await?;
        let engine = ValidationEngine::new(Arc::new(registry), EngineConfig::from(&config));
        Ok(Store {
            config,
            backend,
            engine,
            compiled: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    /// Get a validated handle on collection `name`.
    pub async fn model(&self, name: &str, source: SchemaSource) -> Result<ValidatedCollection> {
        let compiled = match source {
            SchemaSource::Open => Arc::new(self.engine.compile(&Schema::open())?),
            SchemaSource::Literal(schema) => Arc::new(self.engine.compile(&schema)?),
            SchemaSource::Registry(registry) => self.registered(&registry, name).await?,
        };
        let collection = self.backend.collection(name).await?;
        Ok(ValidatedCollection::new(self.backend.clone(), collection, compiled))
    }

    /// `model` with the schema stored in the configured schema collection.
    pub async fn model_registered(&self, name: &str) -> Result<ValidatedCollection> {
        self.model(name, SchemaSource::Registry(self.config.schema_collection.clone()))
            .await
    }

    async fn registered(&self, registry: &str, name: &str) -> Result<Arc<CompiledSchema>> {
        let key = (registry.to_string(), name.to_string());
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let schema = match self.load_schema(registry, name).await? {
            Some(schema) => schema,
            None => {
                log::debug!("No schema '{name}' in '{registry}', accepting any document");
                Schema::open()
            }
        };
        let compiled = Arc::new(self.engine.compile(&schema)?);
        if let Ok(mut cache) = self.compiled.lock() {
            cache.insert(key, compiled.clone());
        }
        Ok(compiled)
    }

    fn cached(&self, key: &(String, String)) -> Option<Arc<CompiledSchema>> {
        self.compiled.lock().ok()?.get(key).cloned()
    }

    async fn load_schema(&self, registry: &str, name: &str) -> Result<Option<Schema>> {
        let collection = self.backend.collection(registry).await?;
        let found = collection.find(&Query::filter(name_filter(name)).paged(1, 1)).await?;
        let Some(record) = found.documents.into_iter().next() else {
            return Ok(None);
        };
        let schema = record.get("schema").cloned().unwrap_or(Value::Null);
        if schema.is_null() {
            return Ok(None);
        }
        parse_schema_value(schema)
            .map(Some)
            .map_err(|e| HookstoreError::Schema(format!("stored schema '{name}' in '{registry}': {e}")))
    }

    /// The schema stored under `name` in the configured schema collection.
    pub async fn schema(&self, name: &str) -> Result<Option<Schema>> {
        self.load_schema(&self.config.schema_collection, name).await
    }

    /// Store (insert or replace) the schema for `name` in the configured
    /// schema collection. The schema must compile against this store's hooks.
    pub async fn save_schema(&self, name: &str, schema: &Schema) -> Result<()> {
        self.engine.compile(schema)?;

        let registry = &self.config.schema_collection;
        let collection = self.backend.collection(registry).await?;
        let record = serde_json::to_value(SchemaRecord {
            name: name.to_string(),
            schema: schema.clone(),
        })?;
        let record = as_document(record)
            .ok_or_else(|| HookstoreError::Other("schema record is not an object".into()))?;

        let filter = name_filter(name);
        if collection.count(&filter).await? == 0 {
            collection.insert_many(vec![record]).await?;
        } else {
            collection.update_many(&filter, &record).await?;
        }

        if let Ok(mut cache) = self.compiled.lock() {
            cache.remove(&(registry.clone(), name.to_string()));
        }
        log::info!("Saved schema '{name}' to '{registry}'");
        Ok(())
    }

    /// Collection names present in the database.
    pub async fn collections(&self) -> Result<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Database names reachable through the connection.
    pub async fn databases(&self) -> Result<Vec<String>> {
        self.backend.list_databases().await
    }

    /// Drop cached compilations and release the backend.
    pub async fn close(&self) -> Result<()> {
        if let Ok(mut cache) = self.compiled.lock() {
            cache.clear();
        }
        self.backend.close().await
    }
}

fn name_filter(name: &str) -> Document {
    let mut filter = Document::new();
    filter.insert("name".to_string(), Value::String(name.to_string()));
    filter
}
