mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stepwise_config::{ConfigLoader, MigrateConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stepwise", version, about = "Versioned SQLite schema migrations")]
struct Cli {
    /// Config file (defaults to stepwise.yml / stepwise.yaml / stepwise.toml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Directory of <version>_<name>.up.sql / .down.sql files
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upgrade or downgrade the database to a target version
    Migrate {
        /// Target version (defaults to the latest known migration)
        #[arg(long)]
        target: Option<u32>,

        /// Fail if the database is newer than every known migration
        #[arg(long)]
        strict: bool,
    },
    /// Show the current and latest known schema versions
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known migrations and whether they are applied
    List,
}

impl Cli {
    /// Command-line flags win over the config file and environment.
    fn apply_overrides(&self, mut config: MigrateConfig) -> MigrateConfig {
        if let Some(db) = &self.database {
            config.database = db.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if let Command::Migrate { target, strict } = &self.command {
            if target.is_some() {
                config.target_version = *target;
            }
            if *strict {
                config.throw_on_newer_version = true;
            }
        }
        config
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = ConfigLoader::new(".").load(cli.config.as_deref())?;
    let config = cli.apply_overrides(config);

    match cli.command {
        Command::Migrate { .. } => commands::migrate(&config).await,
        Command::Status { json } => commands::status(&config, json),
        Command::List => commands::list(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_migrate_with_target() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "--database",
            "app.db",
            "migrate",
            "--target",
            "3",
            "--strict",
        ])
        .unwrap();

        let config = cli.apply_overrides(MigrateConfig::default());
        assert_eq!(config.database, PathBuf::from("app.db"));
        assert_eq!(config.target_version, Some(3));
        assert!(config.throw_on_newer_version);
    }

    #[test]
    fn flags_without_target_keep_config_target() {
        let cli = Cli::try_parse_from(["stepwise", "migrate"]).unwrap();
        let config = cli.apply_overrides(MigrateConfig {
            target_version: Some(5),
            ..MigrateConfig::default()
        });
        assert_eq!(config.target_version, Some(5));
        assert!(!config.throw_on_newer_version);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "status",
            "--json",
            "--migrations-dir",
            "sql",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Status { json: true }));
        let config = cli.apply_overrides(MigrateConfig::default());
        assert_eq!(config.migrations_dir, PathBuf::from("sql"));
    }

    #[test]
    fn rejects_negative_target() {
        assert!(Cli::try_parse_from(["stepwise", "migrate", "--target", "-1"]).is_err());
    }
}
