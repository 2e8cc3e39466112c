mod ledger;
mod runner;
mod source;

pub use ledger::{Ledger, MIGRATIONS_TABLE};
pub use runner::{pending_units, DiffMode, MigrationReport, MigrationRunner, MigrationStatus};
pub use source::{parse_unit_dir, DirectorySource, MigrationSource, MigrationUnit};
