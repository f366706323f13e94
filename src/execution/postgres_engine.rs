//! PostgreSQL Data Store
//!
//! Pool is created on first use and reused afterwards. Every session is
//! forced read-only at the server.

use crate::error::{PipelineError, Result};
use crate::execution::engine::{DataStore, SqlDialect};
use crate::execution::result::{QueryResult, Row};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

pub struct PostgresStore {
    database_url: String,
    acquire_timeout: Duration,
    pool: OnceCell<PgPool>,
}

impl PostgresStore {
    pub fn new(database_url: impl Into<String>, acquire_timeout: Duration) -> Self {
        Self {
            database_url: database_url.into(),
            acquire_timeout,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&PgPool> {
        self.pool
            .get_or_try_init(|| async {
                let options = PgConnectOptions::from_str(&self.database_url)
                    .map_err(|e| PipelineError::Config(format!("Invalid DATABASE_URL: {}", e)))?
                    .options([("default_transaction_read_only", "on")]);

                let pool = PgPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(self.acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| PipelineError::Database(format!("Failed to establish database connection: {}", e)))?;

                info!("Connected to PostgreSQL");
                Ok::<PgPool, PipelineError>(pool)
            })
            .await
    }
}

#[async_trait]
impl DataStore for PostgresStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let pool = self.pool().await?;
        let rows = sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db_err) => PipelineError::Execution(db_err.message().to_string()),
                None => PipelineError::Database(e.to_string()),
            })?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Row::new();
            for (idx, column) in row.columns().iter().enumerate() {
                record.insert(column.name().to_string(), decode_value(row, idx)?);
            }
            records.push(record);
        }

        Ok(QueryResult::new(columns, records))
    }
}

/// How a Postgres column is turned into JSON, by type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Text,
}

impl CellKind {
    fn from_type_name(type_name: &str) -> Self {
        match type_name.to_uppercase().as_str() {
            "BOOL" => CellKind::Bool,
            "INT2" => CellKind::Int2,
            "INT4" => CellKind::Int4,
            "INT8" => CellKind::Int8,
            "FLOAT4" => CellKind::Float4,
            "FLOAT8" => CellKind::Float8,
            "NUMERIC" => CellKind::Numeric,
            "DATE" => CellKind::Date,
            "TIME" => CellKind::Time,
            "TIMESTAMP" => CellKind::Timestamp,
            "TIMESTAMPTZ" => CellKind::TimestampTz,
            "UUID" => CellKind::Uuid,
            "JSON" | "JSONB" => CellKind::Json,
            _ => CellKind::Text,
        }
    }
}

/// Decode one cell into JSON. A cell that cannot be decoded is an execution
/// error naming the column, so the repair loop can cast it to text.
fn decode_value(row: &PgRow, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let type_name = column.type_info().name();
    let decoded = match CellKind::from_type_name(type_name) {
        CellKind::Bool => decode::<bool, _>(row, idx, Value::Bool),
        CellKind::Int2 => decode::<i16, _>(row, idx, |v| Value::from(v as i64)),
        CellKind::Int4 => decode::<i32, _>(row, idx, |v| Value::from(v as i64)),
        CellKind::Int8 => decode::<i64, _>(row, idx, Value::from),
        CellKind::Float4 => decode::<f32, _>(row, idx, |v| float_value(v as f64)),
        CellKind::Float8 => decode::<f64, _>(row, idx, float_value),
        CellKind::Numeric => decode::<sqlx::types::Decimal, _>(row, idx, |v| {
            let text = v.to_string();
            text.parse::<f64>().map(float_value).unwrap_or(Value::String(text))
        }),
        CellKind::Date => decode::<chrono::NaiveDate, _>(row, idx, |v| Value::String(v.to_string())),
        CellKind::Time => decode::<chrono::NaiveTime, _>(row, idx, |v| Value::String(v.to_string())),
        CellKind::Timestamp => decode::<chrono::NaiveDateTime, _>(row, idx, |v| Value::String(v.to_string())),
        CellKind::TimestampTz => {
            decode::<chrono::DateTime<chrono::Utc>, _>(row, idx, |v| Value::String(v.to_rfc3339()))
        }
        CellKind::Uuid => decode::<sqlx::types::Uuid, _>(row, idx, |v| Value::String(v.to_string())),
        CellKind::Json => decode::<Value, _>(row, idx, |v| v),
        CellKind::Text => decode::<String, _>(row, idx, Value::String),
    };
    decoded.map_err(|e| undecodable(column.name(), type_name, &e))
}

fn decode<'r, T, F>(row: &'r PgRow, idx: usize, convert: F) -> std::result::Result<Value, sqlx::Error>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    F: FnOnce(T) -> Value,
{
    Ok(row.try_get::<Option<T>, _>(idx)?.map(convert).unwrap_or(Value::Null))
}

fn undecodable(column: &str, type_name: &str, cause: &dyn std::fmt::Display) -> PipelineError {
    PipelineError::Execution(format!(
        "Cannot read column '{}' of type {} ({}); cast it to text in the query",
        column, type_name, cause
    ))
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
