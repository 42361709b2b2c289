//! Query Executor
//!
//! Runs one arbitrary SQL statement and returns its rows as a
//! [`TabularResult`]. Failures are returned, never retried here; the
//! self-correcting query loop is the only caller that resubmits.

use crate::db::DbPool;
use crate::error::Result;
use crate::execution::TabularResult;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgRow};
use sqlx::{Column, Executor, Postgres, Row, TypeInfo};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Database-level rejection of a statement.
///
/// `message` is fed verbatim into the next correction prompt; `code` is the
/// SQLSTATE when the server supplied one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub code: Option<String>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl From<sqlx::Error> for ExecutionError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) => {
                let mut message = db.message().to_string();
                if let Some(pg) = db.try_downcast_ref::<PgDatabaseError>() {
                    if let Some(detail) = pg.detail() {
                        message.push_str(&format!("\nDETAIL: {}", detail));
                    }
                    if let Some(hint) = pg.hint() {
                        message.push_str(&format!("\nHINT: {}", hint));
                    }
                }
                Self {
                    message,
                    code: db.code().map(|c| c.to_string()),
                }
            }
            other => Self::new(other.to_string()),
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute one statement as its own autocommitted unit.
    async fn execute(&self, sql: &str) -> std::result::Result<TabularResult, ExecutionError>;
}

/// Postgres-backed executor.
pub struct PgExecutor {
    pool: DbPool,
}

impl PgExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Public base tables, as the model would need to reference them.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Column names for a statement that returned no rows.
    async fn describe_columns(&self, sql: &str) -> Vec<String> {
        match (&self.pool).describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                warn!("Could not describe empty result: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    /// Runs as a single prepared statement, so several `;`-separated
    /// statements in one string are rejected by the server.
    async fn execute(&self, sql: &str) -> std::result::Result<TabularResult, ExecutionError> {
        let start_time = Instant::now();
        debug!("Executing SQL: {}", sql);

        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(|e| {
            let err = ExecutionError::from(e);
            warn!(code = ?err.code, "SQL execution failed: {}", err.message);
            err
        })?;

        let columns = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => self.describe_columns(sql).await,
        };
        let values = rows.iter().map(row_values).collect::<Vec<_>>();

        info!(
            "Statement returned {} rows in {}ms",
            values.len(),
            start_time.elapsed().as_millis()
        );

        Ok(TabularResult::new(columns, values))
    }
}

/// Decode one nullable column; `None` means the Rust type did not match.
fn decode<'r, T>(row: &'r PgRow, idx: usize, map: impl FnOnce(T) -> Value) -> Option<Value>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Some(map(v)),
        Ok(None) => Some(Value::Null),
        Err(_) => None,
    }
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Convert a database row to positional JSON values
fn row_values(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let type_name = column.type_info().name();
            let value = match type_name {
                "BOOL" => decode::<bool>(row, idx, Value::Bool),
                "INT2" => decode::<i16>(row, idx, |i| Value::Number(i.into())),
                "INT4" => decode::<i32>(row, idx, |i| Value::Number(i.into())),
                "INT8" => decode::<i64>(row, idx, |i| Value::Number(i.into())),
                "FLOAT4" => decode::<f32>(row, idx, |f| float(f as f64)),
                "FLOAT8" => decode::<f64>(row, idx, float),
                "NUMERIC" => decode::<rust_decimal::Decimal>(row, idx, |d| match d.to_f64() {
                    Some(f) if f.is_finite() => float(f),
                    _ => Value::String(d.to_string()),
                }),
                "JSON" | "JSONB" => decode::<Value>(row, idx, |v| v),
                "UUID" => decode::<uuid::Uuid>(row, idx, |u| Value::String(u.to_string())),
                "DATE" => decode::<chrono::NaiveDate>(row, idx, |d| Value::String(d.to_string())),
                "TIME" => decode::<chrono::NaiveTime>(row, idx, |t| Value::String(t.to_string())),
                "TIMESTAMP" => decode::<chrono::NaiveDateTime>(row, idx, |dt| {
                    Value::String(dt.to_string())
                }),
                "TIMESTAMPTZ" => decode::<chrono::DateTime<chrono::Utc>>(row, idx, |dt| {
                    Value::String(dt.to_rfc3339())
                }),
                _ => decode::<String>(row, idx, Value::String),
            };
            value.unwrap_or_else(|| Value::String(format!("<{}>", type_name)))
        })
        .collect()
}
