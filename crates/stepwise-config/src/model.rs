use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for one migration run. Every field has a default, so an empty
/// file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// SQLite database file to migrate.
    pub database: PathBuf,
    /// Directory holding `<version>_<name>.up.sql` / `.down.sql` files.
    pub migrations_dir: PathBuf,
    /// `None` migrates to the latest known version.
    pub target_version: Option<u32>,
    pub throw_on_newer_version: bool,
    /// SQLite busy handler timeout applied before each attempt takes the
    /// write lock.
    pub busy_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("stepwise.db"),
            migrations_dir: PathBuf::from("migrations"),
            target_version: None,
            throw_on_newer_version: false,
            busy_timeout_ms: 0,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 0 retries until the lock is released.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}
