//! Execution Module - Data stores behind a single statement-execution contract
//!
//! - DataStore trait for pluggable stores
//! - Read-only guard applied before every statement
//! - Store implementations (PostgreSQL, SQLite)

pub mod engine;
pub mod guard;
pub mod result;

// Store implementations
pub mod postgres_engine;
pub mod sqlite_engine;

pub use engine::{DataStore, SqlDialect};
pub use guard::ensure_read_only;
pub use postgres_engine::PostgresStore;
pub use result::{QueryResult, Row};
pub use sqlite_engine::SqliteStore;

use crate::error::{PipelineError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Pick a store from a database URL: `postgres://…`, `sqlite://path` or a bare `.db`/`.sqlite` path.
pub fn connect_store(database_url: &str, acquire_timeout: Duration) -> Result<Arc<dyn DataStore>> {
    let url = database_url.trim();
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        return Ok(Arc::new(PostgresStore::new(url, acquire_timeout)));
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        return Ok(Arc::new(SqliteStore::open(path)));
    }
    if url.ends_with(".db") || url.ends_with(".sqlite") || url.ends_with(".sqlite3") {
        return Ok(Arc::new(SqliteStore::open(url)));
    }
    Err(PipelineError::Config(format!(
        "Unsupported DATABASE_URL '{}': expected postgres:// or sqlite://",
        url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_store_by_scheme() {
        let timeout = Duration::from_secs(1);
        assert_eq!(connect_store("postgres://u:p@localhost/crm", timeout).unwrap().name(), "postgres");
        assert_eq!(connect_store("sqlite://data/crm.db", timeout).unwrap().name(), "sqlite");
        assert_eq!(connect_store("crm.sqlite", timeout).unwrap().dialect(), SqlDialect::Sqlite);
        assert!(connect_store("mysql://localhost/crm", timeout).is_err());
    }
}
