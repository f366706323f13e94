//! SQLite Data Store
//!
//! File databases are opened read-only on first use. An existing connection can
//! be wrapped directly, which is how demos and tests seed in-memory data.
//!
//! Statements run on a blocking thread. If the caller stops waiting (a timeout
//! or deadline drops the future), the running statement is interrupted so the
//! connection is free for the next attempt.

use crate::error::{PipelineError, Result};
use crate::execution::engine::{DataStore, SqlDialect};
use crate::execution::result::{QueryResult, Row};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// VM instructions between cancellation checks.
const PROGRESS_OPS: i32 = 1000;

pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Lazily open the database file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            path: None,
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        let sql = sql.to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancelled));

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PipelineError::Database("SQLite connection lock poisoned".to_string()))?;

            if guard.is_none() {
                let path = path.ok_or_else(|| PipelineError::Database("No SQLite database configured".to_string()))?;
                let opened = Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(|e| PipelineError::Database(format!("Failed to establish database connection: {}", e)))?;
                info!("Opened SQLite database {}", path.display());
                *guard = Some(opened);
            }

            if cancelled.load(Ordering::Relaxed) {
                return Err(PipelineError::Execution("Statement cancelled before it started".to_string()));
            }
            match guard.as_ref() {
                Some(conn) => run_cancellable(conn, &sql, cancelled),
                None => Err(PipelineError::Database("No SQLite connection".to_string())),
            }
        })
        .await
        .map_err(|e| PipelineError::Database(format!("SQLite worker failed: {}", e)))?
    }
}

/// Flags the statement as abandoned when the awaiting future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn run_cancellable(conn: &Connection, sql: &str, cancelled: Arc<AtomicBool>) -> Result<QueryResult> {
    conn.progress_handler(PROGRESS_OPS, Some(move || cancelled.load(Ordering::Relaxed)));
    let result = run_query(conn, sql);
    conn.progress_handler(0, None::<fn() -> bool>);
    result
}

fn run_query(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| PipelineError::Execution(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| PipelineError::Execution(e.to_string()))?;
    let mut records = Vec::new();

    while let Some(row) = rows.next().map_err(|e| PipelineError::Execution(e.to_string()))? {
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            let value = match row.get_ref(idx)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::from(i),
                ValueRef::Real(f) => serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
            };
            record.insert(name.clone(), value);
        }
        records.push(record);
    }

    Ok(QueryResult::new(columns, records))
}
