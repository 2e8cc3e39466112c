use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

/// Phase of a migration run in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Scanning the migrations directory.
    Discovery,
    /// Reading a unit's SQL body.
    BodyRead,
    /// Executing a unit's SQL body.
    Execute,
    /// Recording a unit in the ledger.
    Record,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Discovery => "discovery",
            Phase::BodyRead => "body-read",
            Phase::Execute => "execute",
            Phase::Record => "record",
        };
        f.write_str(s)
    }
}

/// Core error type for DUNA operations.
#[derive(Error, Debug)]
pub enum DunaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Transaction already committed or rolled back")]
    TransactionAlreadyClosed,

    #[error("Failed to read migrations directory {}: {source}", root.display())]
    Discovery {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ordering key in migration directory '{entry}': {source}")]
    InvalidOrderingKey {
        entry: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Failed to read {file} for migration '{migration}': {source}")]
    MigrationBody {
        migration: String,
        file: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to execute migration '{migration}': {reason}")]
    Execution { migration: String, reason: String },

    #[error("Failed to record migration '{migration}': {reason}")]
    Ledger { migration: String, reason: String },

    #[error("Migration '{migration}' is already recorded in the ledger (applied by another runner?)")]
    DuplicateMigration { migration: String },

    #[error("Ledger does not match migrations on disk at position {position}: recorded {recorded}, discovered {discovered}")]
    LedgerMismatch {
        position: usize,
        recorded: String,
        discovered: String,
    },
}

impl DunaError {
    /// The run phase this error belongs to, if it came from a migration run.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            DunaError::Discovery { .. } | DunaError::InvalidOrderingKey { .. } => {
                Some(Phase::Discovery)
            }
            DunaError::MigrationBody { .. } => Some(Phase::BodyRead),
            DunaError::Execution { .. } => Some(Phase::Execute),
            DunaError::Ledger { .. } | DunaError::DuplicateMigration { .. } => Some(Phase::Record),
            _ => None,
        }
    }

    /// The migration identifier (`<key>-<slug>`) this error is attached to.
    pub fn migration(&self) -> Option<&str> {
        match self {
            DunaError::InvalidOrderingKey { entry, .. } => Some(entry),
            DunaError::MigrationBody { migration, .. }
            | DunaError::Execution { migration, .. }
            | DunaError::Ledger { migration, .. }
            | DunaError::DuplicateMigration { migration } => Some(migration),
            _ => None,
        }
    }
}

/// Result type alias using DunaError.
pub type Result<T> = std::result::Result<T, DunaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_of_run_errors() {
        let err = DunaError::Execution {
            migration: "1-init".into(),
            reason: "syntax error".into(),
        };
        assert_eq!(err.phase(), Some(Phase::Execute));
        assert_eq!(err.migration(), Some("1-init"));

        let err = DunaError::DuplicateMigration {
            migration: "2-users".into(),
        };
        assert_eq!(err.phase(), Some(Phase::Record));

        assert_eq!(DunaError::TransactionAlreadyClosed.phase(), None);
    }

    #[test]
    fn test_invalid_ordering_key_message() {
        let source = "abc".parse::<i64>().unwrap_err();
        let err = DunaError::InvalidOrderingKey {
            entry: "abc-bad".into(),
            source,
        };
        assert_eq!(err.phase(), Some(Phase::Discovery));
        assert!(err.to_string().contains("abc-bad"));
    }
}
