//! The version-stepping state machine.
//!
//! Every attempt runs inside one `BEGIN IMMEDIATE` transaction and moves
//! `PRAGMA user_version` one step at a time towards the target. Any failure
//! rolls the whole attempt back, so the schema and its version never
//! disagree.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Direction, MigrationError};
use crate::migration::{Migration, MigrationSet};
use crate::retry::RetryPolicy;

/// Parameters of one `migrate` call.
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Defaults to the highest version in the migration set.
    pub target_version: Option<u32>,
    /// Fail instead of silently stopping when the database is newer than
    /// every known migration.
    pub throw_on_newer_version: bool,
    pub retry: RetryPolicy,
}

impl MigrateOptions {
    pub fn target(version: u32) -> Self {
        Self {
            target_version: Some(version),
            ..Self::default()
        }
    }

    pub fn strict(mut self) -> Self {
        self.throw_on_newer_version = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedStep {
    pub direction: Direction,
    pub from: u32,
    pub to: u32,
}

/// What a successful `migrate` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub start_version: u32,
    pub final_version: u32,
    pub steps: Vec<AppliedStep>,
    /// Attempts needed to get the write lock, 1 when uncontended.
    pub attempts: u32,
    /// The database was newer than every known migration and was left alone.
    pub skipped_newer: bool,
}

/// Next move of the state machine for a given version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Done,
    SkipNewer,
    Step(Direction),
}

/// Decide the next move from `current` towards `target`.
pub fn plan(
    current: u32,
    target: u32,
    max_known: u32,
    throw_on_newer_version: bool,
) -> Result<Plan, MigrationError> {
    if current > max_known {
        if throw_on_newer_version {
            return Err(MigrationError::NewerVersion { current, max_known });
        }
        return Ok(Plan::SkipNewer);
    }

    Ok(match current.cmp(&target) {
        std::cmp::Ordering::Equal => Plan::Done,
        std::cmp::Ordering::Less => Plan::Step(Direction::Upgrade),
        std::cmp::Ordering::Greater => Plan::Step(Direction::Downgrade),
    })
}

/// Read the persisted schema version.
///
/// Other tools can write any 32-bit value, so negative versions are
/// reported instead of being treated as an engine failure.
pub fn current_version(conn: &Connection) -> Result<u32, MigrationError> {
    let value: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let version = u32::try_from(value)
        .ok()
        .filter(|v| *v <= i32::MAX as u32)
        .ok_or(MigrationError::InvalidSchemaVersion { value })?;
    debug!(version, "read schema version");
    Ok(version)
}

fn set_version(conn: &Connection, version: u32) -> Result<(), MigrationError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Move the database to `options.target_version` (or the latest known
/// version) and return what was done.
///
/// On error nothing from the failing attempt is persisted.
pub fn migrate(
    conn: &Connection,
    migrations: &MigrationSet,
    options: &MigrateOptions,
) -> Result<MigrationOutcome, MigrationError> {
    let runner = Runner::new(conn, migrations, options);
    info!(
        target_version = runner.target,
        max_known_version = runner.max_known,
        "running schema migrations"
    );

    let outcome = options.retry.run(|attempt| runner.attempt(attempt))?;

    info!(
        from = outcome.start_version,
        to = outcome.final_version,
        steps = outcome.steps.len(),
        attempts = outcome.attempts,
        "schema migrations finished"
    );
    Ok(outcome)
}

/// Build a set from `migrations` and migrate to `target_version` with
/// default options.
pub fn migrate_to(
    conn: &Connection,
    migrations: impl IntoIterator<Item = Migration>,
    target_version: Option<u32>,
) -> Result<MigrationOutcome, MigrationError> {
    let set = MigrationSet::new(migrations)?;
    let options = MigrateOptions {
        target_version,
        ..MigrateOptions::default()
    };
    migrate(conn, &set, &options)
}

struct Runner<'a> {
    conn: &'a Connection,
    migrations: &'a MigrationSet,
    target: u32,
    max_known: u32,
    throw_on_newer_version: bool,
}

impl<'a> Runner<'a> {
    fn new(conn: &'a Connection, migrations: &'a MigrationSet, options: &MigrateOptions) -> Self {
        let max_known = migrations.max_version();
        Self {
            conn,
            migrations,
            target: options.target_version.unwrap_or(max_known),
            max_known,
            throw_on_newer_version: options.throw_on_newer_version,
        }
    }

    fn attempt(&self, attempt: u32) -> Result<MigrationOutcome, MigrationError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        match self.drive(&tx) {
            Ok(mut outcome) => {
                // A busy COMMIT leaves the transaction open; dropping `tx`
                // rolls it back before the retry.
                tx.commit()?;
                outcome.attempts = attempt;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!("rollback after failed migration also failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn drive(&self, conn: &Connection) -> Result<MigrationOutcome, MigrationError> {
        let start_version = current_version(conn)?;
        let mut steps = Vec::new();

        loop {
            let current = current_version(conn)?;
            match plan(
                current,
                self.target,
                self.max_known,
                self.throw_on_newer_version,
            )? {
                Plan::Done => {
                    return Ok(MigrationOutcome {
                        start_version,
                        final_version: current,
                        steps,
                        attempts: 0,
                        skipped_newer: false,
                    });
                }
                Plan::SkipNewer => {
                    warn!(
                        version = current,
                        max_known_version = self.max_known,
                        "database schema is newer than known migrations, leaving it untouched"
                    );
                    return Ok(MigrationOutcome {
                        start_version,
                        final_version: current,
                        steps,
                        attempts: 0,
                        skipped_newer: true,
                    });
                }
                Plan::Step(direction) => steps.push(self.step(conn, current, direction)?),
            }
        }
    }

    fn step(
        &self,
        conn: &Connection,
        from: u32,
        direction: Direction,
    ) -> Result<AppliedStep, MigrationError> {
        // A migration's `down` reverts from its own version, so a downgrade
        // from N looks up migration N.
        let (lookup, to) = match direction {
            Direction::Upgrade => (from + 1, from + 1),
            Direction::Downgrade => (from, from - 1),
        };

        let migration = self
            .migrations
            .get(lookup)
            .ok_or(MigrationError::MissingMigration { version: lookup })?;
        let action = match direction {
            Direction::Upgrade => &migration.up,
            Direction::Downgrade => &migration.down,
        };

        if let Err(source) = action.run(conn) {
            error!("{direction} from version {from} to version {to} failed: {source}");
            return Err(MigrationError::Step {
                direction,
                from,
                to,
                source,
            });
        }
        set_version(conn, to)?;

        info!(%direction, from, to, "applied migration");
        Ok(AppliedStep { direction, from, to })
    }
}
