//! Testing utilities for code built on DUNA.
//!
//! In-memory doubles for the two capabilities the migration engine depends
//! on, so runs can be exercised without a live database or disk:
//! - [`MockDatabase`] implements [`DatabaseAccess`](crate::db::DatabaseAccess)
//!   with a ledger table, an exec log, and fault injection.
//! - [`MemoryFileSystem`] implements [`FileSystem`](crate::fs::FileSystem).

pub mod memory_fs;
pub mod mock_db;

pub use memory_fs::MemoryFileSystem;
pub use mock_db::{ExecutedStatement, LedgerRow, MockDatabase};
