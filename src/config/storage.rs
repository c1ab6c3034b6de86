//! Storage configuration types.

use serde::Deserialize;

/// Default database file.
pub const DEFAULT_DATABASE_PATH: &str = "signup.db";

/// Default time a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// SQLite storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Busy timeout in milliseconds.
    ///
    /// Bounds how long a writer waits behind another writer's transaction.
    pub busy_timeout_ms: u64,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATABASE_PATH.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}
