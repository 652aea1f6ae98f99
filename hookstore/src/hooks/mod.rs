// Named field hooks run by the validation engine after the structural check.
//
// A hook sees one field value and may replace it, reject it, or (for
// `array`) recurse into its items through the same dispatch routine.

mod standard;

pub use standard::{
    verify_hash, ArrayHook, ExistsHook, HashHook, IncrementHook, TimestampInsertedHook,
    TimestampUpdatedHook, UniqueHook,
};
pub(crate) use standard::hash_params;

use crate::document::Document;
use crate::engine::EngineConfig;
use crate::error::{HookstoreError, Result};
use crate::schema::HookSpec;
use crate::storage::{StorageBackend, StorageCollection};
use crate::validation::ValidationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One rejected hook invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookError {
    /// Field path, with an index suffix inside arrays (`authors/1`).
    pub field: String,
    pub hook: String,
    pub message: String,
}

impl From<HookError> for ValidationError {
    fn from(e: HookError) -> Self {
        ValidationError::Hook {
            field: e.field,
            hook: e.hook,
            message: e.message,
        }
    }
}

/// Why a hook did not accept a value.
#[derive(Debug)]
pub enum HookFailure {
    /// The value is rejected with this message.
    Invalid(String),
    /// Nested invocations failed (already tagged with their own paths).
    Items(Vec<HookError>),
    /// The backend failed; this aborts the whole operation.
    Storage(HookstoreError),
}

impl From<HookstoreError> for HookFailure {
    fn from(e: HookstoreError) -> Self {
        HookFailure::Storage(e)
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookFailure::Invalid(message) => f.write_str(message),
            HookFailure::Items(errors) => {
                let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
                f.write_str(&messages.join("\n"))
            }
            HookFailure::Storage(e) => write!(f, "{e}"),
        }
    }
}

pub type HookResult = std::result::Result<Option<Value>, HookFailure>;

/// A field-level check or transformation.
///
/// `value` is the field's current value (`None` when absent). Returning
/// `Ok(Some(v))` replaces the value, `Ok(None)` leaves it as is.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn apply(&self, value: Option<&Value>, ctx: &HookContext<'_>) -> HookResult;
}

/// Everything a hook can see while processing one field of one record.
pub struct HookContext<'a> {
    /// The collection being written.
    pub collection: &'a dyn StorageCollection,
    /// The database, for hooks that look into other collections.
    pub backend: &'a dyn StorageBackend,
    pub registry: &'a HookRegistry,
    pub config: &'a EngineConfig,
    /// Stored version of the record; empty on insert.
    pub previous: &'a Document,
    /// The record (or patch) being validated.
    pub record: &'a Document,
    /// Top-level field name.
    pub field: &'a str,
    /// Where errors are reported; equals `field` outside of arrays.
    pub path: String,
    /// The rule being applied, with its arguments.
    pub spec: &'a HookSpec,
}

impl<'a> HookContext<'a> {
    pub fn is_insert(&self) -> bool {
        self.previous.is_empty()
    }

    /// Context for item `index` of an array field, governed by `spec`.
    pub fn item(&self, index: usize, spec: &'a HookSpec) -> HookContext<'a> {
        HookContext {
            collection: self.collection,
            backend: self.backend,
            registry: self.registry,
            config: self.config,
            previous: self.previous,
            record: self.record,
            field: self.field,
            path: format!("{}/{index}", self.path),
            spec,
        }
    }
}

/// Run every hook of `ctx.spec`, in declared order, over `value`.
///
/// Values replaced by one hook are seen by the next. Rejections are
/// collected; a storage failure stops processing and is returned as `Err`.
pub async fn dispatch(value: &mut Option<Value>, ctx: &HookContext<'_>) -> Result<Vec<HookError>> {
    let mut errors = Vec::new();
    for name in &ctx.spec.hooks {
        let Some(hook) = ctx.registry.get(name) else {
            return Err(HookstoreError::UnknownHook {
                field: ctx.path.clone(),
                hook: name.clone(),
            });
        };
        match hook.apply(value.as_ref(), ctx).await {
            Ok(Some(replacement)) => *value = Some(replacement),
            Ok(None) => {}
            Err(HookFailure::Invalid(message)) => {
                log::debug!("Hook '{name}' rejected '{}': {message}", ctx.path);
                errors.push(HookError {
                    field: ctx.path.clone(),
                    hook: name.clone(),
                    message,
                });
            }
            Err(HookFailure::Items(nested)) => errors.extend(nested),
            Err(HookFailure::Storage(e)) => return Err(e),
        }
    }
    Ok(errors)
}

/// Name-keyed hook table. `standard()` carries the built-in hooks; more can
/// be registered before schemas are compiled.
#[derive(Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn empty() -> Self {
        HookRegistry {
            hooks: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .register("increment", IncrementHook)
            .register("unique", UniqueHook)
            .register("exists", ExistsHook)
            .register("hash", HashHook)
            .register("timestamp_inserted", TimestampInsertedHook)
            .register("timestamp_updated", TimestampUpdatedHook)
            .register("array", ArrayHook);
        registry
    }

    /// Add or replace a hook under `name`.
    pub fn register(&mut self, name: &str, hook: impl Hook + 'static) -> &mut Self {
        self.hooks.insert(name.to_string(), Arc::new(hook));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Hook> {
        self.hooks.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Hook for Upper {
        async fn apply(&self, value: Option<&Value>, _ctx: &HookContext<'_>) -> HookResult {
            Ok(value.and_then(Value::as_str).map(|s| Value::String(s.to_uppercase())))
        }
    }

    #[test]
    fn test_standard_registry() {
        let registry = HookRegistry::standard();
        assert_eq!(
            registry.names(),
            vec![
                "array",
                "exists",
                "hash",
                "increment",
                "timestamp_inserted",
                "timestamp_updated",
                "unique"
            ]
        );
        assert!(!HookRegistry::empty().contains("unique"));
    }

    #[test]
    fn test_register_custom_hook() {
        let mut registry = HookRegistry::standard();
        registry.register("upper", Upper);
        assert!(registry.contains("upper"));
        assert!(registry.get("upper").is_some());
        assert!(registry.get("lower").is_none());
    }

    #[test]
    fn test_hook_error_converts_to_validation_error() {
        let err = HookError {
            field: "authors/1".into(),
            hook: "exists".into(),
            message: "missing".into(),
        };
        assert_eq!(
            ValidationError::from(err).to_string(),
            "/authors/1 [exists]: missing"
        );
    }
}
