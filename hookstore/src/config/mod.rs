use crate::error::{HookstoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default reserved collection holding `{name, schema}` documents.
pub const DEFAULT_SCHEMA_COLLECTION: &str = "@schemes";

/// Default strftime format for the timestamp hooks.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default cost factor for the `hash` hook.
pub const DEFAULT_HASH_COST: u32 = 2;

/// How identifiers are generated for records that reach storage without one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdFormat {
    /// Random 16-character string.
    #[default]
    Text,
    /// Highest existing numeric identifier + 1.
    Number,
}

impl std::str::FromStr for IdFormat {
    type Err = HookstoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" | "string" => Ok(IdFormat::Text),
            "number" => Ok(IdFormat::Number),
            other => Err(HookstoreError::Config(format!(
                "unknown id format '{other}' (expected 'text' or 'number')"
            ))),
        }
    }
}

/// Connection and engine settings for a [`crate::Store`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// `mongodb://…` for the networked store, otherwise a filesystem root.
    pub url: String,
    pub database: String,
    pub id_format: IdFormat,
    pub hash_cost: u32,
    pub timestamp_format: String,
    pub schema_collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: ".".to_string(),
            database: "hookstore".to_string(),
            id_format: IdFormat::default(),
            hash_cost: DEFAULT_HASH_COST,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            schema_collection: DEFAULT_SCHEMA_COLLECTION.to_string(),
        }
    }
}

impl StoreConfig {
    /// Config for the given connection string and database, defaults elsewhere.
    pub fn new(url: &str, database: &str) -> Self {
        StoreConfig {
            url: url.to_string(),
            database: database.to_string(),
            ..Default::default()
        }
    }

    /// Parse a YAML (or JSON) config document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Read `HOOKSTORE_URL`, `HOOKSTORE_DATABASE`, `HOOKSTORE_ID_FORMAT` and
    /// `HOOKSTORE_HASH_COST`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = StoreConfig::default();
        if let Some(url) = lookup("HOOKSTORE_URL") {
            config.url = url;
        }
        if let Some(database) = lookup("HOOKSTORE_DATABASE") {
            config.database = database;
        }
        if let Some(format) = lookup("HOOKSTORE_ID_FORMAT") {
            config.id_format = format.parse()?;
        }
        if let Some(cost) = lookup("HOOKSTORE_HASH_COST") {
            config.hash_cost = cost.parse().map_err(|_| {
                HookstoreError::Config(format!("HOOKSTORE_HASH_COST must be an integer, got '{cost}'"))
            })?;
        }
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(HookstoreError::Config("database name must not be empty".into()));
        }
        if self.hash_cost == 0 {
            return Err(HookstoreError::Config("hash_cost must be at least 1".into()));
        }
        Ok(())
    }
}
