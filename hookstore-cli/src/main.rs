use clap::{Parser, Subcommand, ValueEnum};
use hookstore::schema::parse_schema;
use hookstore::{Document, Query, Store, StoreConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;

/// hookstore CLI: schema-validated reads and writes from the command line
#[derive(Parser)]
#[command(name = "hookstore", version, about)]
struct Cli {
    /// YAML config file (default: HOOKSTORE_* environment variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the connection string (mongodb://... or a directory)
    #[arg(long)]
    url: Option<String>,

    /// Override the database name
    #[arg(long)]
    database: Option<String>,

    /// Output format
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Find documents in a collection
    Find {
        /// Collection name
        collection: String,
        /// Query as JSON: {"filter": ..., "sort": ..., "pagination": ...}
        #[arg(long)]
        query: Option<String>,
        /// Include the collection's stored schema in the output
        #[arg(long)]
        schema: bool,
    },

    /// Count documents matching a filter
    Count {
        /// Collection name
        collection: String,
        /// Filter as JSON
        #[arg(long)]
        filter: Option<String>,
    },

    /// Insert one document or a JSON array of documents
    Insert {
        /// Collection name
        collection: String,
        /// Document(s) as JSON
        data: Option<String>,
        /// Field values (e.g. --field name=Guy --field age=30)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Apply a patch to every matching document
    Update {
        /// Collection name
        collection: String,
        /// Filter as JSON
        filter: String,
        /// Patch as JSON
        patch: String,
    },

    /// Update matching documents, or insert filter + data when none match
    Upsert {
        /// Collection name
        collection: String,
        /// Filter as JSON
        filter: String,
        /// Data as JSON
        data: String,
    },

    /// Delete matching documents
    Delete {
        /// Collection name
        collection: String,
        /// Filter as JSON
        filter: String,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// List collections in the database
    Collections,

    /// List databases reachable through the connection
    Databases,

    /// Read or store collection schemas
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Print the stored schema for a collection
    Get {
        /// Collection name
        name: String,
    },
    /// Store a schema (YAML or JSON file) for a collection
    Set {
        /// Collection name
        name: String,
        /// Schema file
        file: PathBuf,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = connect_and_run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

/// Run the command, then close the store whether or not it succeeded.
async fn connect_and_run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    log::debug!("Using database '{}'", config.database);
    let store = Store::connect(config).await?;

    let outcome = run(&store, cli).await;
    let closed = store.close().await;
    outcome?;
    closed?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::from_env()?,
    };
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    Ok(config)
}

async fn run(store: &Store, cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Find {
            collection,
            query,
            schema,
        } => {
            let query: Query = match query {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| format!("Invalid query JSON: {e}"))?,
                None => Query::default(),
            };
            let model = store.model_registered(&collection).await?;
            let found = model.find(&query).await?;
            let mut output = json!({
                "documents": found.documents,
                "pagination": found.pagination,
            });
            if schema {
                output["schema"] = serde_json::to_value(store.schema(&collection).await?)?;
            }
            print_output(&output, &cli.format)?;
        }

        Command::Count { collection, filter } => {
            let filter = match filter {
                Some(raw) => parse_document(&raw)?,
                None => Document::new(),
            };
            let model = store.model_registered(&collection).await?;
            let count = model.count(&filter).await?;
            print_output(&json!({ "count": count }), &cli.format)?;
        }

        Command::Insert {
            collection,
            data,
            fields,
        } => {
            let mut records = match data {
                Some(raw) => parse_records(&raw)?,
                None => vec![Document::new()],
            };
            let extra = fields_to_document(&fields);
            for record in records.iter_mut() {
                record.extend(extra.clone());
            }
            let model = store.model_registered(&collection).await?;
            let inserted = model.insert(records).await?;
            print_output(
                &json!({ "inserted": inserted, "errors": model.errors() }),
                &cli.format,
            )?;
        }

        Command::Update {
            collection,
            filter,
            patch,
        } => {
            let model = store.model_registered(&collection).await?;
            let previous = model
                .update(&parse_document(&filter)?, &parse_document(&patch)?)
                .await?;
            print_output(
                &json!({ "updated": previous, "errors": model.errors() }),
                &cli.format,
            )?;
        }

        Command::Upsert {
            collection,
            filter,
            data,
        } => {
            let model = store.model_registered(&collection).await?;
            let outcome = model
                .upsert(&parse_document(&filter)?, &parse_document(&data)?)
                .await?;
            let mut output = serde_json::to_value(&outcome)?;
            output["errors"] = serde_json::to_value(model.errors())?;
            print_output(&output, &cli.format)?;
        }

        Command::Delete {
            collection,
            filter,
            dry_run,
        } => {
            let filter = parse_document(&filter)?;
            let model = store.model_registered(&collection).await?;
            if dry_run {
                let found = model.find(&Query::filter(filter)).await?;
                print_output(
                    &json!({ "dry_run": true, "would_delete": found.documents }),
                    &cli.format,
                )?;
            } else {
                let deleted = model.delete(&filter).await?;
                print_output(&json!({ "deleted": deleted }), &cli.format)?;
            }
        }

        Command::Collections => {
            let names = store.collections().await?;
            print_output(&json!(names), &cli.format)?;
        }

        Command::Databases => {
            let names = store.databases().await?;
            print_output(&json!(names), &cli.format)?;
        }

        Command::Schema { action } => match action {
            SchemaAction::Get { name } => {
                let schema = store
                    .schema(&name)
                    .await?
                    .ok_or_else(|| format!("No schema stored for '{name}'"))?;
                print_output(&serde_json::to_value(schema)?, &cli.format)?;
            }
            SchemaAction::Set { name, file } => {
                let schema = parse_schema(&file)?;
                store.save_schema(&name, &schema).await?;
                print_output(&json!({ "ok": true, "name": name }), &cli.format)?;
            }
        },
    }
    Ok(())
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn parse_document(raw: &str) -> Result<Document, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("Expected a JSON object, got {other}")),
        Err(e) => Err(format!("Invalid JSON '{raw}': {e}")),
    }
}

fn parse_records(raw: &str) -> Result<Vec<Document>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(format!("Expected JSON objects, got {other}")),
            })
            .collect(),
        Ok(Value::Object(map)) => Ok(vec![map]),
        Ok(other) => Err(format!("Expected a JSON object or array, got {other}")),
        Err(e) => Err(format!("Invalid JSON '{raw}': {e}")),
    }
}

fn fields_to_document(fields: &[(String, String)]) -> Document {
    let mut map = Document::new();
    for (key, val) in fields {
        // numbers, booleans, arrays and objects parse as JSON; anything else is a string
        let json_val = serde_json::from_str(val).unwrap_or(Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("name=Guy=1").unwrap(),
            ("name".to_string(), "Guy=1".to_string())
        );
        assert!(parse_key_value("name").is_err());
    }

    #[test]
    fn test_fields_to_document() {
        let doc = fields_to_document(&[
            ("name".into(), "Guy".into()),
            ("age".into(), "30".into()),
            ("tags".into(), "[\"a\"]".into()),
        ]);
        assert_eq!(Value::Object(doc), json!({"name": "Guy", "age": 30, "tags": ["a"]}));
    }

    #[test]
    fn test_parse_records() {
        assert_eq!(parse_records(r#"{"a": 1}"#).unwrap().len(), 1);
        assert_eq!(parse_records(r#"[{"a": 1}, {"b": 2}]"#).unwrap().len(), 2);
        assert!(parse_records("[1]").is_err());
        assert!(parse_records("nope").is_err());
        assert!(parse_document("[]").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "hookstore",
            "--url",
            "/tmp/data",
            "insert",
            "authors",
            r#"{"name": "Guy"}"#,
            "--field",
            "email=guy@x",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Insert { ref fields, .. } if fields.len() == 1));

        let cli = Cli::try_parse_from(["hookstore", "databases"]).unwrap();
        assert!(matches!(cli.command, Command::Databases));

        let cli = Cli::try_parse_from(["hookstore", "schema", "set", "authors", "authors.yaml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Schema { action: SchemaAction::Set { .. } }
        ));
    }

    #[tokio::test]
    async fn test_failing_command_reports_error_after_closing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let url = tmp.path().to_str().unwrap();

        let bad = Cli::try_parse_from(["hookstore", "--url", url, "count", "authors", "--filter", "nope"]).unwrap();
        let err = connect_and_run(bad).await.unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));

        let good = Cli::try_parse_from(["hookstore", "--url", url, "databases"]).unwrap();
        connect_and_run(good).await.unwrap();
    }
}
