pub mod db;
pub mod migrations;

pub use db::PgDatabase;
pub use migrations::{DirectorySource, Ledger, MigrationReport, MigrationRunner, MigrationUnit};
