use super::types::Schema;
use crate::error::{HookstoreError, Result};
use serde_json::Value;
use std::path::Path;

/// Parse a schema file (YAML or JSON).
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema from YAML or JSON text. JSON is accepted as YAML.
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let schema: Schema = serde_yaml::from_str(content)?;
    Ok(schema)
}

/// Interpret an already-decoded JSON value, e.g. the `schema` field of a
/// stored schema record.
pub fn parse_schema_value(value: Value) -> Result<Schema> {
    serde_json::from_value(value).map_err(|e| HookstoreError::Schema(e.to_string()))
}
