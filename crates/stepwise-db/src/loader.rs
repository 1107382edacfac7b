use std::collections::BTreeMap;
use std::path::Path;

use stepwise_common::{Error, Result};
use tracing::{debug, info};

use crate::migration::{Migration, MigrationSet};

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

#[derive(Default)]
struct Pair {
    up: Option<String>,
    down: Option<String>,
}

/// Load SQL migrations from a directory.
///
/// Files are named `<version>_<description>.up.sql` and
/// `<version>_<description>.down.sql`; both halves are required. Other
/// files are ignored.
pub fn load_dir(dir: &Path) -> Result<MigrationSet> {
    info!("loading migrations from {}", dir.display());
    if !dir.is_dir() {
        return Err(Error::NotFound(format!(
            "migrations directory {}",
            dir.display()
        )));
    }

    let mut pairs: BTreeMap<u32, Pair> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let (stem, is_up) = if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
            (stem, true)
        } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
            (stem, false)
        } else {
            debug!("skipping {}", path.display());
            continue;
        };

        let version = parse_version(stem)
            .ok_or_else(|| Error::Config(format!("invalid migration file name: {file_name}")))?;
        let sql = std::fs::read_to_string(&path)?;

        let pair = pairs.entry(version).or_default();
        let slot = if is_up { &mut pair.up } else { &mut pair.down };
        if slot.replace(sql).is_some() {
            return Err(Error::Config(format!(
                "more than one {} file for migration {version}",
                if is_up { "up" } else { "down" }
            )));
        }
    }

    let mut migrations = Vec::with_capacity(pairs.len());
    for (version, pair) in pairs {
        let up = pair
            .up
            .ok_or_else(|| Error::Config(format!("migration {version} has no up file")))?;
        let down = pair
            .down
            .ok_or_else(|| Error::Config(format!("migration {version} has no down file")))?;
        migrations.push(Migration::new(version, up, down));
    }

    let set = MigrationSet::new(migrations)?;
    info!(
        count = set.len(),
        max_version = set.max_version(),
        "migrations loaded"
    );
    Ok(set)
}

fn parse_version(stem: &str) -> Option<u32> {
    let digits = stem.split_once('_').map_or(stem, |(v, _)| v);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
