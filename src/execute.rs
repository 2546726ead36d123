//! SQL execution against the target database.
//!
//! Runs one statement per call on a connection opened for that call and
//! released before returning. Rows decode into a JSON result table keyed by
//! the headers the driver reports; any driver or database failure surfaces
//! as a single `QueryExecution` error so the caller can decide whether a
//! repair attempt is worth making.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, Statement, TypeInfo};

use crate::config::TargetConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::ResultTable;
use crate::target::TargetPool;

/// Execute one SQL statement and collect the complete result set.
///
/// The connection is scoped to this call and released on every path. The
/// statement is prepared first, so headers come from the statement's column
/// metadata and survive a result set with zero matching rows; only a
/// statement that reports no columns (DDL/DML) yields an empty table. The
/// result is never truncated.
pub async fn execute_query(target: &TargetConfig, sql: &str) -> PipelineResult<ResultTable> {
    let pool = TargetPool::connect(target)
        .await
        .map_err(|e| PipelineError::QueryExecution(e.to_string()))?;
    let result = fetch_table(&pool, sql).await;
    pool.close().await;
    result
}

async fn fetch_table(pool: &TargetPool, sql: &str) -> PipelineResult<ResultTable> {
    let exec_err = |e: sqlx::Error| PipelineError::QueryExecution(e.to_string());
    match pool {
        TargetPool::Postgres(pg) => {
            let statement = pg.prepare(sql).await.map_err(exec_err)?;
            let headers = header_names(statement.columns());
            let rows = statement.query().fetch_all(pg).await.map_err(exec_err)?;
            Ok(postgres_table(headers, &rows))
        }
        TargetPool::Sqlite(sq) => {
            let statement = sq.prepare(sql).await.map_err(exec_err)?;
            let headers = header_names(statement.columns());
            let rows = statement.query().fetch_all(sq).await.map_err(exec_err)?;
            Ok(sqlite_table(headers, &rows))
        }
    }
}

fn header_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

fn postgres_table(headers: Vec<String>, rows: &[PgRow]) -> ResultTable {
    let rows = rows
        .iter()
        .map(|row| (0..headers.len()).map(|i| postgres_value(row, i)).collect())
        .collect();
    ResultTable { headers, rows }
}

fn sqlite_table(headers: Vec<String>, rows: &[SqliteRow]) -> ResultTable {
    let rows = rows
        .iter()
        .map(|row| (0..headers.len()).map(|i| sqlite_value(row, i)).collect())
        .collect();
    ResultTable { headers, rows }
}

/// Decode one Postgres column into a JSON value. SQL NULL and any value the
/// declared type cannot represent both render as JSON null; types outside
/// the list fall back to their text form where the driver allows it.
fn postgres_value(row: &PgRow, i: usize) -> Value {
    match row.columns()[i].type_info().name() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(i)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(i)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(i)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(i)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)
            .ok()
            .flatten()
            .map(|f| Value::from(f64::from(f)))
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(i)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(i)
            .ok()
            .flatten()
            .map(decimal_value)
            .unwrap_or(Value::Null),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(i)
            .ok()
            .flatten()
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(i)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(i)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(i)
            .ok()
            .flatten()
            .map(|ts| Value::String(ts.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
            .ok()
            .flatten()
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(i)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map(|b| bytes_value(&b))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Decode one SQLite column into a JSON value. SQLite reports affinity, not
/// storage, so the date/time and NUMERIC arms probe alternate decodings
/// before giving up.
fn sqlite_value(row: &SqliteRow, i: usize) -> Value {
    match row.columns()[i].type_info().name() {
        "NULL" => Value::Null,
        "INTEGER" => row
            .try_get::<Option<i64>, _>(i)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<Option<f64>, _>(i)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TEXT" => row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(i)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map(|b| bytes_value(&b))
            .unwrap_or(Value::Null),
        _ => sqlite_probe_value(row, i),
    }
}

fn sqlite_probe_value(row: &SqliteRow, i: usize) -> Value {
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(i) {
        return Value::String(text);
    }
    if let Ok(Some(int)) = row.try_get::<Option<i64>, _>(i) {
        return Value::from(int);
    }
    if let Ok(Some(real)) = row.try_get::<Option<f64>, _>(i) {
        return Value::from(real);
    }
    Value::Null
}

/// NUMERIC renders as a JSON number when it fits in an f64, otherwise as its
/// exact decimal text.
fn decimal_value(value: Decimal) -> Value {
    value
        .to_f64()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn bytes_value(bytes: &[u8]) -> Value {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    Value::String(hex)
}
