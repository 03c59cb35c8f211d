//! Catalog database bootstrap
//!
//! Opens the SQLite catalog with WAL and foreign keys on, applies the
//! embedded migrations and checks the connection before handing the pool
//! out. Tests use [`create_test_pool`], a single-connection in-memory
//! catalog.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Where the catalog lives and how many connections may touch it
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// `None` for an in-memory catalog
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    /// How long a writer waits on a locked catalog
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_connections: 5,
            busy_timeout: Duration::from_secs(10),
        }
    }

    /// Each in-memory connection is its own database, so the pool holds one.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            max_connections: 1,
            busy_timeout: Duration::from_secs(10),
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::new().in_memory(true),
        };
        options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }
}

/// Open the catalog and bring its schema up to date
///
/// # Errors
///
/// Returns [`LibraryError::Database`] if the file cannot be opened and
/// [`LibraryError::Migration`] if the schema cannot be applied.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(config.connect_options())
        .await
        .map_err(|err| {
            warn!(path = ?config.path, error = %err, "Could not open catalog");
            LibraryError::Database(err)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|err| LibraryError::Migration(err.to_string()))?;
    sqlx::query("SELECT 1").execute(&pool).await?;

    info!(path = ?config.path, "Catalog ready");
    Ok(pool)
}

pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

/// Insert a library row and return its id
pub async fn insert_library(pool: &Pool<Sqlite>, path: &str, now: i64) -> Result<i64> {
    let result = sqlx::query("INSERT INTO libraries (path, created_at, updated_at) VALUES (?, ?, ?)")
        .bind(path)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}
