use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;

use crate::error::{ActionError, MigrationError};

type Procedure = dyn Fn(&Connection) -> Result<(), ActionError> + Send + Sync;

/// One half of a migration: either a literal SQL batch or Rust code run
/// against the connection inside the migration transaction.
#[derive(Clone)]
pub enum MigrationAction {
    Statements(String),
    Procedure(Arc<Procedure>),
}

impl MigrationAction {
    pub fn statements(sql: impl Into<String>) -> Self {
        MigrationAction::Statements(sql.into())
    }

    pub fn procedure<F>(f: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        MigrationAction::Procedure(Arc::new(f))
    }

    pub(crate) fn run(&self, conn: &Connection) -> Result<(), ActionError> {
        match self {
            MigrationAction::Statements(sql) => conn.execute_batch(sql).map_err(Into::into),
            MigrationAction::Procedure(f) => f(conn),
        }
    }
}

impl fmt::Debug for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationAction::Statements(sql) => f.debug_tuple("Statements").field(sql).finish(),
            MigrationAction::Procedure(_) => f.write_str("Procedure(..)"),
        }
    }
}

impl From<&str> for MigrationAction {
    fn from(sql: &str) -> Self {
        MigrationAction::Statements(sql.to_string())
    }
}

impl From<String> for MigrationAction {
    fn from(sql: String) -> Self {
        MigrationAction::Statements(sql)
    }
}

/// A reversible schema transition. `up` moves the database from
/// `version - 1` to `version`, `down` moves it back.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub up: MigrationAction,
    pub down: MigrationAction,
}

impl Migration {
    pub fn new(
        version: u32,
        up: impl Into<MigrationAction>,
        down: impl Into<MigrationAction>,
    ) -> Self {
        Self {
            version,
            up: up.into(),
            down: down.into(),
        }
    }
}

/// Migrations indexed by version.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    by_version: BTreeMap<u32, Migration>,
}

impl MigrationSet {
    /// Build a set from migrations in any order.
    ///
    /// Versions must be unique and fit in `PRAGMA user_version`, which is a
    /// signed 32-bit integer. Gaps are allowed here and only fail once the
    /// runner needs the missing version.
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self, MigrationError> {
        let mut by_version = BTreeMap::new();
        for migration in migrations {
            let version = migration.version;
            if version == 0 {
                return Err(MigrationError::InvalidMigration {
                    version,
                    reason: "versions start at 1".into(),
                });
            }
            if version > i32::MAX as u32 {
                return Err(MigrationError::InvalidMigration {
                    version,
                    reason: format!("exceeds the maximum schema version {}", i32::MAX),
                });
            }
            if by_version.insert(version, migration).is_some() {
                return Err(MigrationError::DuplicateMigration { version });
            }
        }
        Ok(Self { by_version })
    }

    pub fn get(&self, version: u32) -> Option<&Migration> {
        self.by_version.get(&version)
    }

    /// Highest version in the set, 0 when empty.
    pub fn max_version(&self) -> u32 {
        self.by_version.keys().fold(0, |max, &v| max.max(v))
    }

    pub fn len(&self) -> usize {
        self.by_version.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }

    /// Migrations in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.by_version.values()
    }
}
