//! Transactional persistence for every entity in the data model.
//!
//! [`Store`] wraps a single [`SqlitePool`] opened in WAL mode with foreign
//! keys enabled. Schema is applied once at startup from an embedded SQL
//! file via `sqlx::raw_sql`; every statement in it is
//! `CREATE TABLE IF NOT EXISTS` so re-running it against an already
//! initialized database is a no-op, making startup idempotent without a
//! bespoke migration DSL.
//!
//! State transitions that must stay atomic (payment intake, broadcast
//! lifecycle changes, funnel materialisation) are implemented as a single
//! [`sqlx::Transaction`] in their respective submodule rather than a
//! sequence of independent statements.

pub mod models;

mod bots;
mod broadcasts;
mod conversations;
mod funnel;
mod referrals;
mod subscribers;
mod users;

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA_SQL: &str = include_str!("../../migrations/001_init.sql");

/// Handle to the relational store. Cheaply cloneable (the pool is an
/// `Arc` internally); share one instance across every component.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path` and apply
    /// the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails to
    /// apply; a migration failure at startup is fatal to the process.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .with_context(|| format!("invalid database path: {}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("failed to open store database")?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to apply store schema")?;

        Ok(Self { pool })
    }

    /// Open an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or the schema fails
    /// to apply.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory store")?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to apply store schema")?;

        Ok(Self { pool })
    }

    /// Borrow the underlying pool for submodules that need raw access.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_dt(raw: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .with_context(|| format!("invalid timestamp in store row: {raw}"))
}

fn fmt_dt(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339()
}
