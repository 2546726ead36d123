//! Scoped connections to the target database.
//!
//! The target is whatever database the user's questions run against; it is
//! never the local index store. The URL scheme selects the backend. Each
//! introspection or execution opens its own handle and releases it when the
//! operation finishes, so concurrent requests never share target state.

use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use std::str::FromStr;

use crate::config::TargetConfig;

/// A scoped handle on the target database, one backend variant per
/// supported driver.
pub enum TargetPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl TargetPool {
    /// Connect to the configured target. One connection is established
    /// eagerly, so an unreachable target fails here rather than mid-query.
    pub async fn connect(target: &TargetConfig) -> Result<Self> {
        if target.is_postgres() {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect(&target.url)
                .await?;
            Ok(TargetPool::Postgres(pool))
        } else if target.is_sqlite() {
            let options = SqliteConnectOptions::from_str(&target.url)?;
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;
            Ok(TargetPool::Sqlite(pool))
        } else {
            bail!("Unsupported target url: {}", target.url);
        }
    }

    /// Release the underlying connection.
    pub async fn close(&self) {
        match self {
            TargetPool::Postgres(pool) => pool.close().await,
            TargetPool::Sqlite(pool) => pool.close().await,
        }
    }
}
