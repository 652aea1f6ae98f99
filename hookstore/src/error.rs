use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookstoreError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown hook '{hook}' declared for field '{field}'")]
    UnknownHook { field: String, hook: String },

    #[error("Invalid name '{0}': allowed characters are [A-Za-z0-9-_#$@]")]
    InvalidName(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Hash error: {0}")]
    Hash(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("BSON encode error: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("BSON decode error: {0}")]
    BsonDecode(#[from] bson::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HookstoreError>;
