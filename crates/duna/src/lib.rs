//! DUNA - ordered, exactly-once schema migrations for PostgreSQL.
//!
//! Migration units live in `<root>/<ordering_key>-<slug>/up.sql`. A run
//! applies every unit not yet recorded in the ledger table, in ascending
//! key order, and records each one after its SQL succeeds.

pub use duna_core::{
    DatabaseAccess, DatabaseConfig, DunaConfig, DunaError, MigrationsConfig, Phase, Result,
};
pub use duna_runtime::migrations::{
    DiffMode, DirectorySource, Ledger, MigrationReport, MigrationRunner, MigrationSource,
    MigrationStatus, MigrationUnit,
};
pub use duna_runtime::PgDatabase;
