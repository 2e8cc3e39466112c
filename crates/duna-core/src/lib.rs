pub mod config;
pub mod db;
pub mod error;
pub mod fs;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{DatabaseConfig, DunaConfig, MigrationsConfig};
pub use db::{DatabaseAccess, Row, SqlValue, TxHandle};
pub use error::{DunaError, Phase, Result};
pub use fs::{DirEntry, FileSystem, OsFileSystem};
