use super::{assign_ids, max_numeric_id, BackendKind, StorageBackend, StorageCollection};
use crate::config::IdFormat;
use crate::document::{lookup, Document, ID_FIELD};
use crate::error::{HookstoreError, Result};
use crate::query::{compare_values, matches, FindResult, PaginationInfo, Query, SortOrder};
use async_trait::async_trait;
use regex::Regex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

const DATABASE_SUFFIX: &str = "db";
const TABLE_SUFFIX: &str = "table";

/// File-backed store: `{root}/{database}.db/{collection}.table`, one SQLite
/// file per collection. Handles are opened on first use and cached for the
/// lifetime of the store.
pub struct EmbeddedStore {
    root: PathBuf,
    database_path: PathBuf,
    id_format: IdFormat,
    handles: Mutex<HashMap<String, Arc<EmbeddedCollection>>>,
}

/// Database and collection names may only use `[A-Za-z0-9-_#$@]`.
pub fn validate_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9\-_#$@]+$").expect("name pattern is a valid regex")
    });
    if re.is_match(name) {
        Ok(())
    } else {
        Err(HookstoreError::InvalidName(name.to_string()))
    }
}

impl EmbeddedStore {
    /// Open (creating if needed) the database directory under `root`.
    pub fn open(root: &str, database: &str, id_format: IdFormat) -> Result<Self> {
        validate_name(database)?;
        let root = match root {
            "" => PathBuf::from("."),
            root => PathBuf::from(root),
        };
        let database_path = root.join(format!("{database}.{DATABASE_SUFFIX}"));
        std::fs::create_dir_all(&database_path)?;
        Ok(EmbeddedStore {
            root,
            database_path,
            id_format,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.database_path.join(format!("{name}.{TABLE_SUFFIX}"))
    }

    fn handles(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<EmbeddedCollection>>>> {
        self.handles
            .lock()
            .map_err(|_| HookstoreError::Storage("embedded handle cache poisoned".into()))
    }

    fn open_collection(&self, name: &str) -> Result<Arc<EmbeddedCollection>> {
        validate_name(name)?;
        let mut handles = self.handles()?;
        if let Some(handle) = handles.get(name) {
            return Ok(Arc::clone(handle));
        }

        let path = self.table_path(name);
        log::debug!("Opening embedded collection at {}", path.display());
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id_key TEXT NOT NULL UNIQUE,
                data_json TEXT NOT NULL
            );
            ",
        )?;

        let handle = Arc::new(EmbeddedCollection {
            name: name.to_string(),
            id_format: self.id_format,
            conn: Mutex::new(conn),
        });
        handles.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }
}

#[async_trait]
impl StorageBackend for EmbeddedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn StorageCollection>> {
        let handle: Arc<dyn StorageCollection> = self.open_collection(name)?;
        Ok(handle)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        stems_with_suffix(&self.database_path, TABLE_SUFFIX, Path::is_file)
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        stems_with_suffix(&self.root, DATABASE_SUFFIX, Path::is_dir)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.handles()?.remove(name);
        let path = self.table_path(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.handles()?.clear();
        Ok(())
    }
}

/// Sorted file stems of the entries in `dir` named `*.{suffix}` that pass `kind`.
fn stems_with_suffix(dir: &Path, suffix: &str, kind: fn(&Path) -> bool) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !kind(&path) || path.extension().and_then(|e| e.to_str()) != Some(suffix) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// One collection's SQLite file. All access goes through the connection mutex.
pub struct EmbeddedCollection {
    name: String,
    id_format: IdFormat,
    conn: Mutex<Connection>,
}

impl EmbeddedCollection {
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|_| {
            HookstoreError::Storage(format!("collection '{}' connection poisoned", self.name))
        })?;
        f(&mut conn)
    }

    /// Every document matching `filter`, with its row sequence, in insertion order.
    fn load_matching(conn: &Connection, filter: &Document) -> Result<Vec<(i64, Document)>> {
        let mut stmt = conn.prepare("SELECT seq, data_json FROM documents ORDER BY seq")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut docs = Vec::new();
        for row in rows {
            let (seq, data_json) = row?;
            let doc: Document = serde_json::from_str(&data_json)?;
            if matches(&doc, filter)? {
                docs.push((seq, doc));
            }
        }
        Ok(docs)
    }
}

fn id_key(doc: &Document) -> Result<String> {
    let id = doc
        .get(ID_FIELD)
        .ok_or_else(|| HookstoreError::Storage("document has no _id".into()))?;
    Ok(serde_json::to_string(id)?)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl StorageCollection for EmbeddedCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, filter: &Document) -> Result<u64> {
        self.with_conn(|conn| Ok(Self::load_matching(conn, filter)?.len() as u64))
    }

    async fn find(&self, query: &Query) -> Result<FindResult> {
        self.with_conn(|conn| {
            let mut docs: Vec<Document> = Self::load_matching(conn, &query.filter)?
                .into_iter()
                .map(|(_, doc)| doc)
                .collect();
            let count = docs.len() as u64;

            if let Some(sort) = &query.sort {
                docs.sort_by(|a, b| {
                    let ord = compare_values(lookup(a, &sort.field), lookup(b, &sort.field));
                    match sort.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                });
            }

            let pagination = PaginationInfo::compute(query.pagination.as_ref(), count);
            if query.pagination.is_some() {
                docs = docs
                    .into_iter()
                    .skip(pagination.skip as usize)
                    .take(pagination.per_page as usize)
                    .collect();
            }

            Ok(FindResult {
                documents: docs,
                pagination,
            })
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

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for doc in &docs {
                let key = id_key(doc)?;
                let data_json = serde_json::to_string(doc)?;
                if let Err(e) = tx.execute(
                    "INSERT INTO documents (id_key, data_json) VALUES (?1, ?2)",
                    params![key, data_json],
                ) {
                    if is_constraint_violation(&e) {
                        return Err(HookstoreError::Storage(format!(
                            "duplicate _id {key} in collection '{}'",
                            self.name
                        )));
                    }
                    return Err(e.into());
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        Ok(docs)
    }

    async fn update_many(&self, filter: &Document, patch: &Document) -> Result<u64> {
        self.with_conn(|conn| {
            let targets = Self::load_matching(conn, filter)?;
            let tx = conn.transaction()?;
            for (seq, mut doc) in targets.iter().cloned() {
                for (key, value) in patch {
                    if key != ID_FIELD {
                        doc.insert(key.clone(), value.clone());
                    }
                }
                tx.execute(
                    "UPDATE documents SET data_json = ?1 WHERE seq = ?2",
                    params![serde_json::to_string(&doc)?, seq],
                )?;
            }
            tx.commit()?;
            Ok(targets.len() as u64)
        })
    }

    async fn delete_many(&self, filter: &Document) -> Result<u64> {
        self.with_conn(|conn| {
            let targets = Self::load_matching(conn, filter)?;
            let tx = conn.transaction()?;
            for (seq, _) in &targets {
                tx.execute("DELETE FROM documents WHERE seq = ?1", params![seq])?;
            }
            tx.commit()?;
            Ok(targets.len() as u64)
        })
    }
}
