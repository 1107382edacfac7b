use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::MigrationError;
use crate::migration::MigrationSet;
use crate::runner::{MigrateOptions, MigrationOutcome, migrate};

/// Run [`migrate`] from async code.
///
/// The connection mutex is held for the whole run, so concurrent callers
/// sharing one connection are serialised instead of interleaving steps.
pub async fn migrate_shared(
    conn: Arc<Mutex<Connection>>,
    migrations: Arc<MigrationSet>,
    options: MigrateOptions,
) -> Result<MigrationOutcome, MigrationError> {
    tokio::task::spawn_blocking(move || {
        let conn = conn
            .lock()
            .map_err(|_| MigrationError::Interrupted("connection lock poisoned".into()))?;
        migrate(&conn, &migrations, &options)
    })
    .await
    .map_err(|e| MigrationError::Interrupted(e.to_string()))?
}
