use std::fmt;

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

/// Error type returned by procedural migration actions.
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which way a single step moves the schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upgrade => f.write_str("upgrade"),
            Direction::Downgrade => f.write_str("downgrade"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("cannot find migration for version {version}")]
    MissingMigration { version: u32 },

    #[error("{direction} from version {from} to version {to} failed: {source}")]
    Step {
        direction: Direction,
        from: u32,
        to: u32,
        #[source]
        source: ActionError,
    },

    #[error("database version {current} is newer than the latest known migration {max_known}")]
    NewerVersion { current: u32, max_known: u32 },

    #[error("invalid schema version {value} in database, expected 0 to 2147483647")]
    InvalidSchemaVersion { value: i64 },

    #[error("database is locked, gave up after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("duplicate migration for version {version}")]
    DuplicateMigration { version: u32 },

    #[error("invalid migration version {version}: {reason}")]
    InvalidMigration { version: u32, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration task interrupted: {0}")]
    Interrupted(String),
}

impl MigrationError {
    /// Lock contention on the write lock. Only these errors are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrationError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

impl From<MigrationError> for stepwise_common::Error {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Database(e) => stepwise_common::Error::Database(e.to_string()),
            other => stepwise_common::Error::Migration(other.to_string()),
        }
    }
}
