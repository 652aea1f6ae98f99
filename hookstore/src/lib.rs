pub mod collection;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod query;
pub mod schema;
pub mod storage;
pub mod store;
pub mod validation;

pub use collection::{RecordError, UpsertOutcome, ValidatedCollection};
pub use config::{IdFormat, StoreConfig};
pub use document::{Document, ID_FIELD};
pub use engine::{CompiledSchema, EngineConfig, ValidationEngine, Verdict};
pub use error::{HookstoreError, Result};
pub use hooks::{verify_hash, Hook, HookContext, HookError, HookFailure, HookRegistry};
pub use query::{FindResult, Pagination, PaginationInfo, Query, Sort, SortOrder};
pub use schema::{HookSpec, Schema};
pub use storage::{BackendKind, StorageBackend, StorageCollection};
pub use store::{SchemaSource, Store};
pub use validation::ValidationError;
