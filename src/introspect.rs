//! Schema introspection against the target database.
//!
//! [`SchemaSource`] is the seam the refresh pipeline consumes: "list tables
//! in the namespace" and "list (column, type) for table T". The shipped
//! implementation reads PostgreSQL's `information_schema` or SQLite's
//! `sqlite_master` + `PRAGMA table_info`, selected by the target URL.
//! Tests substitute in-memory sources.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::config::TargetConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ColumnDescriptor, SchemaDocument};
use crate::target::TargetPool;

/// Supplies table and column metadata for one logical namespace.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// All table names in the namespace, sorted ascending.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of one table, in declared order.
    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;
}

/// Walk the source and assemble the full schema document.
///
/// Any source failure aborts the walk with `SchemaIntrospectionError`; the
/// caller's previously persisted document stays authoritative.
pub async fn introspect_schema(source: &dyn SchemaSource) -> PipelineResult<SchemaDocument> {
    let tables = source
        .list_tables()
        .await
        .map_err(|e| PipelineError::SchemaIntrospection(e.to_string()))?;

    let mut doc = SchemaDocument::default();
    for table in tables {
        let columns = source
            .list_columns(&table)
            .await
            .map_err(|e| PipelineError::SchemaIntrospection(e.to_string()))?;
        doc.tables.insert(table, columns);
    }

    Ok(doc)
}

/// Introspection over a live target database.
pub struct DatabaseSchemaSource {
    target: TargetConfig,
}

impl DatabaseSchemaSource {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            target: target.clone(),
        }
    }
}

#[async_trait]
impl SchemaSource for DatabaseSchemaSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let pool = TargetPool::connect(&self.target).await?;
        let result = match &pool {
            TargetPool::Postgres(pg) => {
                let rows = sqlx::query(
                    "SELECT table_name FROM information_schema.tables
                     WHERE table_schema = $1 ORDER BY table_name",
                )
                .bind(&self.target.namespace)
                .fetch_all(pg)
                .await?;

                rows.iter()
                    .map(|row| row.try_get::<String, _>("table_name"))
                    .collect::<Result<Vec<_>, _>>()?
            }
            TargetPool::Sqlite(sq) => {
                let rows = sqlx::query(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .fetch_all(sq)
                .await?;

                rows.iter()
                    .map(|row| row.try_get::<String, _>("name"))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        pool.close().await;
        Ok(result)
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let pool = TargetPool::connect(&self.target).await?;
        let result = match &pool {
            TargetPool::Postgres(pg) => {
                let rows = sqlx::query(
                    "SELECT column_name, data_type FROM information_schema.columns
                     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                )
                .bind(&self.target.namespace)
                .bind(table)
                .fetch_all(pg)
                .await?;

                let mut columns = Vec::with_capacity(rows.len());
                for row in &rows {
                    columns.push(ColumnDescriptor {
                        column_name: row.try_get("column_name")?,
                        data_type: row.try_get("data_type")?,
                        column_description: String::new(),
                    });
                }
                columns
            }
            TargetPool::Sqlite(sq) => {
                // PRAGMA arguments cannot be bound; the name comes from
                // sqlite_master and is quoted here.
                let pragma = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
                let mut rows = sqlx::query(&pragma).fetch_all(sq).await?;
                rows.sort_by_key(|row| row.get::<i64, _>("cid"));

                let mut columns = Vec::with_capacity(rows.len());
                for row in &rows {
                    columns.push(ColumnDescriptor {
                        column_name: row.try_get("name")?,
                        data_type: row.try_get("type")?,
                        column_description: String::new(),
                    });
                }
                columns
            }
        };
        pool.close().await;
        Ok(result)
    }
}
