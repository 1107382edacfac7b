use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use stepwise_config::{MigrateConfig, RetryConfig};
use stepwise_db::{MigrateOptions, RetryPolicy, current_version, load_dir, migrate_shared};
use tracing::info;

/// Build the runner's retry policy from config; `max_attempts = 0` means unbounded.
pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    let policy = if config.max_attempts == 0 {
        RetryPolicy::unbounded()
    } else {
        RetryPolicy::bounded(config.max_attempts)
    };
    policy.with_backoff(
        Duration::from_millis(config.initial_backoff_ms),
        Duration::from_millis(config.max_backoff_ms),
    )
}

fn open(config: &MigrateConfig) -> Result<Connection> {
    let conn = Connection::open(&config.database)
        .with_context(|| format!("failed to open {}", config.database.display()))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .context("failed to set busy timeout")?;
    Ok(conn)
}

pub async fn migrate(config: &MigrateConfig) -> Result<()> {
    let migrations = load_dir(&config.migrations_dir).context("failed to load migrations")?;
    let conn = open(config)?;
    let options = MigrateOptions {
        target_version: config.target_version,
        throw_on_newer_version: config.throw_on_newer_version,
        retry: retry_policy(&config.retry),
    };

    let outcome = migrate_shared(Arc::new(Mutex::new(conn)), Arc::new(migrations), options)
        .await
        .with_context(|| format!("failed to migrate {}", config.database.display()))?;

    info!("migration complete for {}", config.database.display());
    if outcome.skipped_newer {
        println!(
            "Database is at version {}, newer than every known migration; left untouched.",
            outcome.final_version
        );
    } else if outcome.steps.is_empty() {
        println!("Already at version {}.", outcome.final_version);
    } else {
        for step in &outcome.steps {
            println!("  {} {} -> {}", step.direction, step.from, step.to);
        }
        println!(
            "Migrated from version {} to version {}.",
            outcome.start_version, outcome.final_version
        );
    }
    Ok(())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum State {
    UpToDate,
    Behind,
    Ahead,
    NewerThanKnown,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub current_version: u32,
    pub max_known_version: u32,
    pub target_version: u32,
    pub state: State,
}

/// Where the database stands relative to `target`, using the runner's own ordering of checks.
pub fn classify(current: u32, target: u32, max_known: u32) -> State {
    if current > max_known {
        State::NewerThanKnown
    } else if current == target {
        State::UpToDate
    } else if current < target {
        State::Behind
    } else {
        State::Ahead
    }
}

fn read_version(config: &MigrateConfig) -> Result<u32> {
    // A database that does not exist yet is at version 0; don't create it.
    if !config.database.exists() {
        return Ok(0);
    }
    let conn = open(config)?;
    Ok(current_version(&conn)?)
}

pub fn status(config: &MigrateConfig, json: bool) -> Result<()> {
    let migrations = load_dir(&config.migrations_dir).context("failed to load migrations")?;
    let current = read_version(config)?;
    let max_known = migrations.max_version();
    let target = config.target_version.unwrap_or(max_known);

    let report = StatusReport {
        database: config.database.display().to_string(),
        current_version: current,
        max_known_version: max_known,
        target_version: target,
        state: classify(current, target, max_known),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Database:       {}", report.database);
    println!("Current:        {}", report.current_version);
    println!("Latest known:   {}", report.max_known_version);
    println!("Target:         {}", report.target_version);
    let summary = match report.state {
        State::UpToDate => "up to date".to_string(),
        State::Behind => format!("{} upgrade(s) pending", target - current),
        State::Ahead => format!("{} downgrade(s) pending", current - target),
        State::NewerThanKnown => "newer than every known migration".to_string(),
    };
    println!("State:          {summary}");
    Ok(())
}

pub fn list(config: &MigrateConfig) -> Result<()> {
    let migrations = load_dir(&config.migrations_dir).context("failed to load migrations")?;
    let current = read_version(config)?;

    if migrations.is_empty() {
        println!("No migrations in {}", config.migrations_dir.display());
        return Ok(());
    }
    for migration in migrations.iter() {
        let mark = if migration.version <= current { "x" } else { " " };
        println!("[{mark}] {}", migration.version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempts_is_unbounded() {
        let policy = retry_policy(&RetryConfig::default());
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));

        let policy = retry_policy(&RetryConfig {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 8,
        });
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4));
    }

    #[test]
    fn classify_matches_runner_decisions() {
        assert_eq!(classify(0, 0, 0), State::UpToDate);
        assert_eq!(classify(0, 2, 2), State::Behind);
        assert_eq!(classify(2, 1, 2), State::Ahead);
        assert_eq!(classify(999, 2, 2), State::NewerThanKnown);
    }

    #[test]
    fn status_report_serializes_state_in_snake_case() {
        let report = StatusReport {
            database: "app.db".into(),
            current_version: 1,
            max_known_version: 2,
            target_version: 2,
            state: State::Behind,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["state"], "behind");
        assert_eq!(value["max_known_version"], 2);
    }

    #[test]
    fn status_and_list_leave_missing_database_uncreated() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("migrations");
        std::fs::create_dir(&sql).unwrap();

        let config = MigrateConfig {
            database: dir.path().join("missing.db"),
            migrations_dir: sql,
            ..MigrateConfig::default()
        };

        status(&config, false).unwrap();
        status(&config, true).unwrap();
        list(&config).unwrap();
        assert!(!config.database.exists());
    }

    #[test]
    fn status_fails_without_migrations_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = MigrateConfig {
            database: dir.path().join("app.db"),
            migrations_dir: dir.path().join("nope"),
            ..MigrateConfig::default()
        };
        assert!(status(&config, false).is_err());
        assert!(!config.database.exists());
    }

    #[tokio::test]
    async fn migrate_command_applies_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("migrations");
        std::fs::create_dir(&sql).unwrap();
        std::fs::write(sql.join("1_init.up.sql"), "CREATE TABLE t (id INTEGER);").unwrap();
        std::fs::write(sql.join("1_init.down.sql"), "DROP TABLE t;").unwrap();

        let config = MigrateConfig {
            database: dir.path().join("app.db"),
            migrations_dir: sql,
            ..MigrateConfig::default()
        };
        assert_eq!(read_version(&config).unwrap(), 0);
        assert!(!config.database.exists());

        migrate(&config).await.unwrap();
        assert_eq!(read_version(&config).unwrap(), 1);
        status(&config, true).unwrap();
        list(&config).unwrap();
    }
}
