// Schema compilation and per-record validation: structural check first,
// then the `updating` hooks field by field.

use crate::config::{StoreConfig, DEFAULT_HASH_COST, DEFAULT_TIMESTAMP_FORMAT};
use crate::document::Document;
use crate::error::{HookstoreError, Result};
use crate::hooks::{dispatch, hash_params, HookContext, HookRegistry};
use crate::schema::{HookSpec, Schema};
use crate::storage::{StorageBackend, StorageCollection};
use crate::validation::{Mode, StructuralValidator, ValidationError};
use std::sync::Arc;

/// Defaults handed to every hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub hash_cost: u32,
    pub timestamp_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hash_cost: DEFAULT_HASH_COST,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl From<&StoreConfig> for EngineConfig {
    fn from(config: &StoreConfig) -> Self {
        EngineConfig {
            hash_cost: config.hash_cost,
            timestamp_format: config.timestamp_format.clone(),
        }
    }
}

/// Outcome for one record: the finished document, or why it was rejected.
pub type Verdict = std::result::Result<Document, Vec<ValidationError>>;

/// Where validated records are headed; hooks query through these.
#[derive(Clone, Copy)]
pub struct WriteTarget<'a> {
    pub collection: &'a dyn StorageCollection,
    pub backend: &'a dyn StorageBackend,
}

/// Compiles schemas against one hook registry and one set of defaults.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    registry: Arc<HookRegistry>,
    config: EngineConfig,
}

impl ValidationEngine {
    pub fn new(registry: Arc<HookRegistry>, config: EngineConfig) -> Self {
        ValidationEngine { registry, config }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check that every hook the schema names is registered, compile its
    /// structural keywords, and return the runnable validator.
    pub fn compile(&self, schema: &Schema) -> Result<CompiledSchema> {
        for (field, spec) in schema.updating.iter() {
            self.check_rule(field, spec)?;
        }
        let structural = StructuralValidator::compile(schema)?;
        log::debug!(
            "Compiled schema: {} properties, {} hook rules",
            schema.properties.len(),
            schema.updating.len()
        );
        Ok(CompiledSchema {
            structural,
            registry: self.registry.clone(),
            config: self.config.clone(),
        })
    }

    fn check_rule(&self, path: &str, spec: &HookSpec) -> Result<()> {
        if spec.hooks.is_empty() {
            return Err(HookstoreError::Schema(format!("rule for '{path}' names no hooks")));
        }
        for hook in &spec.hooks {
            if !self.registry.contains(hook) {
                return Err(HookstoreError::UnknownHook {
                    field: path.to_string(),
                    hook: hook.clone(),
                });
            }
        }
        if spec.hooks.iter().any(|h| h == "hash") {
            hash_params(spec, self.config.hash_cost)
                .map_err(|e| HookstoreError::Schema(format!("hash rule for '{path}': {e}")))?;
        }
        match spec.items.as_deref() {
            Some(items) => self.check_rule(&format!("{path}/items"), items),
            None if spec.hooks.iter().any(|h| h == "array") => Err(HookstoreError::Schema(format!(
                "array rule for '{path}' needs an 'items' rule"
            ))),
            None => Ok(()),
        }
    }
}

/// A schema ready to validate records.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    structural: StructuralValidator,
    registry: Arc<HookRegistry>,
    config: EngineConfig,
}

impl CompiledSchema {
    pub fn schema(&self) -> &Schema {
        self.structural.schema()
    }

    /// Validate a new record. Defaults are filled in first.
    pub async fn validate_insert(&self, target: WriteTarget<'_>, mut doc: Document) -> Result<Verdict> {
        self.structural.apply_defaults(&mut doc);
        self.run(target, &Document::new(), doc, Mode::Insert).await
    }

    /// Validate a patch about to be applied to `previous`.
    pub async fn validate_update(
        &self,
        target: WriteTarget<'_>,
        previous: &Document,
        patch: Document,
    ) -> Result<Verdict> {
        self.run(target, previous, patch, Mode::Update).await
    }

    async fn run(
        &self,
        target: WriteTarget<'_>,
        previous: &Document,
        mut doc: Document,
        mode: Mode,
    ) -> Result<Verdict> {
        let structural_errors = self.structural.validate(&doc, mode);
        if !structural_errors.is_empty() {
            return Ok(Err(structural_errors));
        }

        let mut errors = Vec::new();
        for (field, spec) in self.schema().updating.iter() {
            let original = doc.get(field).cloned();
            let mut value = original.clone();
            let hook_errors = {
                let ctx = HookContext {
                    collection: target.collection,
                    backend: target.backend,
                    registry: &self.registry,
                    config: &self.config,
                    previous,
                    record: &doc,
                    field,
                    path: field.to_string(),
                    spec,
                };
                dispatch(&mut value, &ctx).await?
            };
            errors.extend(hook_errors.into_iter().map(ValidationError::from));
            if let Some(updated) = value {
                if original.as_ref() != Some(&updated) {
                    doc.insert(field.to_string(), updated);
                }
            }
        }

        if errors.is_empty() {
            Ok(Ok(doc))
        } else {
            Ok(Err(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdFormat;
    use crate::document::as_document;
    use crate::schema::parse_schema_str;
    use crate::storage::EmbeddedStore;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const USERS: &str = r#"
properties:
  name: { type: string, minLength: 3 }
  email: { type: string, format: email }
  role: { type: string, default: member }
required: [name, email]
updating:
  _id: { type: increment }
  name: { type: unique }
  email: { type: unique }
"#;

    fn engine() -> ValidationEngine {
        ValidationEngine::new(Arc::new(HookRegistry::standard()), EngineConfig::default())
    }

    fn doc(value: Value) -> Document {
        as_document(value).unwrap()
    }

    fn kinds(errors: &[ValidationError]) -> Vec<String> {
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_compile_rejects_unknown_hooks() {
        let schema = parse_schema_str("updating:\n  name: { type: [unique, shout] }\n").unwrap();
        match engine().compile(&schema) {
            Err(HookstoreError::UnknownHook { field, hook }) => {
                assert_eq!(field, "name");
                assert_eq!(hook, "shout");
            }
            other => panic!("expected UnknownHook, got {other:?}"),
        }

        let nested = parse_schema_str("updating:\n  tags: { type: array, items: { type: nope } }\n").unwrap();
        assert!(matches!(
            engine().compile(&nested),
            Err(HookstoreError::UnknownHook { .. })
        ));
    }

    #[test]
    fn test_compile_requires_items_for_array() {
        let schema = parse_schema_str("updating:\n  tags: { type: array }\n").unwrap();
        assert!(matches!(engine().compile(&schema), Err(HookstoreError::Schema(_))));
    }

    #[test]
    fn test_compile_rejects_bad_hash_parameters() {
        for args in ["cost: 0", "memory: 1", "cost: 4294967296", "salt: -3"] {
            let schema = parse_schema_str(&format!("updating:\n  password: {{ type: hash, {args} }}\n")).unwrap();
            assert!(
                matches!(engine().compile(&schema), Err(HookstoreError::Schema(_))),
                "{args} should be rejected"
            );
        }
        let fine = parse_schema_str("updating:\n  password: { type: hash, cost: 1, memory: 1024 }\n").unwrap();
        assert!(engine().compile(&fine).is_ok());

        let zero_default = ValidationEngine::new(
            Arc::new(HookRegistry::standard()),
            EngineConfig { hash_cost: 0, ..EngineConfig::default() },
        );
        let plain = parse_schema_str("updating:\n  password: { type: hash }\n").unwrap();
        assert!(zero_default.compile(&plain).is_err());
    }

    #[test]
    fn test_custom_registry_without_standard_hooks() {
        let engine = ValidationEngine::new(Arc::new(HookRegistry::empty()), EngineConfig::default());
        let schema = parse_schema_str(USERS).unwrap();
        assert!(engine.compile(&schema).is_err());
        assert!(engine.compile(&Schema::open()).is_ok());
    }

    #[tokio::test]
    async fn test_insert_runs_hooks_and_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = EmbeddedStore::open(tmp.path().to_str().unwrap(), "test", IdFormat::Text).unwrap();
        let users = store.collection("users").await.unwrap();
        let target = WriteTarget {
            collection: users.as_ref(),
            backend: &store,
        };
        let compiled = engine().compile(&parse_schema_str(USERS).unwrap()).unwrap();

        let verdict = compiled
            .validate_insert(target, doc(json!({"name": "Guy", "email": "guy@x"})))
            .await
            .unwrap();
        assert_eq!(
            Value::Object(verdict.unwrap()),
            json!({"name": "Guy", "email": "guy@x", "role": "member", "_id": 1})
        );
    }

    #[tokio::test]
    async fn test_structural_failure_skips_hooks() {
        let tmp = TempDir::new().unwrap();
        let store = EmbeddedStore::open(tmp.path().to_str().unwrap(), "test", IdFormat::Text).unwrap();
        let users = store.collection("users").await.unwrap();
        users
            .insert_many(vec![doc(json!({"_id": 1, "name": "Guy", "email": "guy@x"}))])
            .await
            .unwrap();
        let target = WriteTarget {
            collection: users.as_ref(),
            backend: &store,
        };
        let compiled = engine().compile(&parse_schema_str(USERS).unwrap()).unwrap();

        // duplicate name, but the missing email is reported alone
        let errors = compiled
            .validate_insert(target, doc(json!({"name": "Guy"})))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(kinds(&errors), vec!["/: must have required property 'email'"]);
    }

    #[tokio::test]
    async fn test_hook_errors_are_aggregated_across_fields() {
        let tmp = TempDir::new().unwrap();
        let store = EmbeddedStore::open(tmp.path().to_str().unwrap(), "test", IdFormat::Text).unwrap();
        let users = store.collection("users").await.unwrap();
        users
            .insert_many(vec![doc(json!({"_id": 1, "name": "Guy", "email": "guy@x"}))])
            .await
            .unwrap();
        let target = WriteTarget {
            collection: users.as_ref(),
            backend: &store,
        };
        let compiled = engine().compile(&parse_schema_str(USERS).unwrap()).unwrap();

        let errors = compiled
            .validate_insert(target, doc(json!({"name": "Guy", "email": "guy@x"})))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::Hook {
                    field: "name".into(),
                    hook: "unique".into(),
                    message: "must be a unique value \"name\"".into()
                },
                ValidationError::Hook {
                    field: "email".into(),
                    hook: "unique".into(),
                    message: "must be a unique value \"email\"".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_update_ignores_required_and_keeps_own_value() {
        let tmp = TempDir::new().unwrap();
        let store = EmbeddedStore::open(tmp.path().to_str().unwrap(), "test", IdFormat::Text).unwrap();
        let users = store.collection("users").await.unwrap();
        let previous = doc(json!({"_id": 1, "name": "Guy", "email": "guy@x"}));
        users.insert_many(vec![previous.clone()]).await.unwrap();
        let target = WriteTarget {
            collection: users.as_ref(),
            backend: &store,
        };
        let compiled = engine().compile(&parse_schema_str(USERS).unwrap()).unwrap();

        let patched = compiled
            .validate_update(target, &previous, doc(json!({"name": "Guy"})))
            .await
            .unwrap()
            .unwrap();
        // no `_id` increment and no default on update
        assert_eq!(Value::Object(patched), json!({"name": "Guy"}));
    }
}
