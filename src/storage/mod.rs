//! Storage implementations.
//!
//! SQLite only. Every store takes an explicit [`SqlitePool`] built once at
//! startup by [`connect`]; nothing here looks up ambient connection state.

use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::StorageConfig;

pub mod error;
pub mod member;
pub mod rate_limit;
pub mod record;
pub mod schema;

pub use error::{Result, StorageError, ValidationError};
pub use member::{JoinError, Member, MemberStore};
pub use rate_limit::{Action, MinuteBucket, RateCounter, RateLimiter};
pub use record::{insert_record, Entity, Record, Table};
pub use schema::{
    ensure_table, verify_table, Affinity, Column, Constraint, EntitySchema, InsertPolicy,
};

/// Open a connection pool for the configured database file.
///
/// Creates the file (and its parent directory) if missing. WAL mode lets
/// readers proceed while a rate-limit transaction holds the write lock.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool> {
    info!(
        path = %config.path,
        max_connections = config.max_connections,
        "Storage: sqlite"
    );

    if let Some(parent) = std::path::Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open both stores, creating and verifying their tables.
///
/// A [`StorageError::SchemaMismatch`] here means the database is not the one
/// this code expects; callers should not go on to serve requests.
pub async fn init_storage(pool: &SqlitePool) -> Result<(RateLimiter, MemberStore)> {
    let limiter = RateLimiter::open(pool.clone()).await?;
    let members = MemberStore::open(pool.clone()).await?;
    Ok((limiter, members))
}
