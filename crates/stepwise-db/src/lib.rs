pub mod error;
pub mod loader;
pub mod migration;
pub mod retry;
pub mod runner;
pub mod shared;

pub use error::{ActionError, Direction, MigrationError};
pub use loader::load_dir;
pub use migration::{Migration, MigrationAction, MigrationSet};
pub use retry::RetryPolicy;
pub use runner::{
    AppliedStep, MigrateOptions, MigrationOutcome, Plan, current_version, migrate, migrate_to,
    plan,
};
pub use shared::migrate_shared;
