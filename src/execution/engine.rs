//! Data Store Trait - Core contract for statement execution
//!
//! A data store runs exactly one read-only SQL statement per call and returns
//! tabular rows or an error carrying the store's human-readable message.

use crate::error::Result;
use crate::execution::result::QueryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{Dialect, MsSqlDialect, PostgreSqlDialect, SQLiteDialect};
use std::fmt;

/// SQL flavour spoken by a data store. Drives prompt wording and parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
    MsSql,
}

impl SqlDialect {
    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "PostgreSQL",
            SqlDialect::Sqlite => "SQLite",
            SqlDialect::MsSql => "SQL Server",
        }
    }

    /// How to cap a result set at `n` rows in this dialect.
    pub fn row_cap_hint(&self, n: usize) -> String {
        match self {
            SqlDialect::MsSql => format!("SELECT TOP {} ...", n),
            SqlDialect::Postgres | SqlDialect::Sqlite => format!("... LIMIT {}", n),
        }
    }

    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
            SqlDialect::MsSql => Box::new(MsSqlDialect {}),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Data store capability. Connections are established lazily on first use.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Store name for logs (e.g., "postgres", "sqlite")
    fn name(&self) -> &'static str;

    fn dialect(&self) -> SqlDialect;

    /// Execute a single statement
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}
