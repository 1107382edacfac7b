use std::path::{Path, PathBuf};

use stepwise_common::{Error, Result};
use tracing::{debug, info};

use crate::model::MigrateConfig;

const DEFAULT_FILES: &[&str] = &["stepwise.yml", "stepwise.yaml", "stepwise.toml"];

const ENV_DATABASE: &str = "STEPWISE_DATABASE";
const ENV_MIGRATIONS_DIR: &str = "STEPWISE_MIGRATIONS_DIR";
const ENV_TARGET_VERSION: &str = "STEPWISE_TARGET_VERSION";

/// Resolves a [`MigrateConfig`] from an optional file plus `STEPWISE_*`
/// environment variables.
pub struct ConfigLoader {
    search_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(search_dir: impl Into<PathBuf>) -> Self {
        Self {
            search_dir: search_dir.into(),
        }
    }

    /// Load from `explicit` if given, otherwise from the first default file
    /// found in the search directory, otherwise defaults. Environment
    /// overrides are applied last.
    pub fn load(&self, explicit: Option<&Path>) -> Result<MigrateConfig> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => self.find_default(),
        };

        let config = match path {
            Some(path) => {
                info!("loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("no config file found, using defaults");
                MigrateConfig::default()
            }
        };

        Self::apply_env(config, |key| std::env::var(key).ok())
    }

    fn find_default(&self) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|name| self.search_dir.join(name))
            .find(|p| p.is_file())
    }

    pub fn from_file(path: &Path) -> Result<MigrateConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::parse(&contents, ext)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<MigrateConfig> {
        match ext {
            "yml" | "yaml" => {
                // An empty YAML document deserialises as null, not as `{}`.
                if contents.trim().is_empty() {
                    return Ok(MigrateConfig::default());
                }
                Ok(serde_yaml::from_str(contents)?)
            }
            "toml" => Ok(toml::from_str(contents)?),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(mut config: MigrateConfig, lookup: F) -> Result<MigrateConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DATABASE) {
            config.database = PathBuf::from(db);
        }
        if let Some(dir) = lookup(ENV_MIGRATIONS_DIR) {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Some(target) = lookup(ENV_TARGET_VERSION) {
            let version = target.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_TARGET_VERSION} is not a version: {target}"))
            })?;
            config.target_version = Some(version);
        }
        Ok(config)
    }
}
