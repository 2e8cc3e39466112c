//! Durable record of applied migrations.

use std::sync::Arc;

use tracing::debug;

use duna_core::db::{DatabaseAccess, SqlValue, TxHandle};
use duna_core::error::{DunaError, Result};

use super::source::MigrationUnit;

/// Default ledger table name.
pub const MIGRATIONS_TABLE: &str = "migrations";

/// Append-only ledger table of applied migrations.
///
/// Rows are `(name, timestamp)`, where `name` is the unit's slug and
/// `timestamp` its ordering key. Rows are never updated or deleted here.
pub struct Ledger {
    db: Arc<dyn DatabaseAccess>,
    table: String,
}

impl Ledger {
    /// Ledger stored in the default `migrations` table.
    pub fn new(db: Arc<dyn DatabaseAccess>) -> Self {
        Self::with_table(db, MIGRATIONS_TABLE)
    }

    /// Ledger stored in a custom table. The name must already be validated
    /// as a plain identifier.
    pub fn with_table(db: Arc<dyn DatabaseAccess>, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, timestamp BIGINT NOT NULL)",
            self.table
        );
        self.db
            .exec(None, &sql, &[])
            .await
            .map_err(|e| DunaError::Database(format!("Failed to create migrations table: {}", e)))?;
        Ok(())
    }

    /// Applied units, ascending by ordering key then name, the same order
    /// discovery uses. Bodies are not attached.
    pub async fn list(&self) -> Result<Vec<MigrationUnit>> {
        let sql = format!(
            "SELECT name, timestamp FROM {} ORDER BY timestamp, name",
            self.table
        );
        let rows = self
            .db
            .query(None, &sql, &[])
            .await
            .map_err(|e| DunaError::Database(format!("Failed to get applied migrations: {}", e)))?;

        let mut applied = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.get(0).and_then(SqlValue::as_str);
            let timestamp = row.get(1).and_then(SqlValue::as_i64);
            let (Some(name), Some(timestamp)) = (name, timestamp) else {
                return Err(DunaError::Database(format!(
                    "Malformed row in {}: {:?}",
                    self.table, row
                )));
            };
            applied.push(MigrationUnit::new(name, timestamp, ""));
        }

        debug!(count = applied.len(), "Loaded applied migrations");
        Ok(applied)
    }

    /// Insert one row for `unit` inside `tx`.
    ///
    /// A primary-key violation means another runner already recorded the
    /// unit and is reported as `DuplicateMigration`.
    pub async fn record(&self, unit: &MigrationUnit, tx: TxHandle) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (name, timestamp) VALUES ($1, $2)",
            self.table
        );
        let args = [
            SqlValue::Text(unit.name.clone()),
            SqlValue::Int(unit.ordering_key),
        ];

        match self.db.exec(Some(tx), &sql, &args).await {
            Ok(_) => Ok(()),
            Err(DunaError::UniqueViolation(_)) => Err(DunaError::DuplicateMigration {
                migration: unit.id(),
            }),
            Err(e) => Err(DunaError::Ledger {
                migration: unit.id(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duna_core::testing::MockDatabase;

    fn ledger() -> (Arc<MockDatabase>, Ledger) {
        let db = Arc::new(MockDatabase::new());
        let ledger = Ledger::new(db.clone());
        (db, ledger)
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (db, ledger) = ledger();
        ledger.ensure_schema().await.unwrap();
        ledger.ensure_schema().await.unwrap();

        assert_eq!(db.create_calls(), 2);
        assert_eq!(db.table_count(), 1);
        assert!(db.has_table("migrations"));
    }

    #[tokio::test]
    async fn test_list_ascending() {
        let (db, ledger) = ledger();
        db.seed_ledger("migrations", &[("drop-table", 456), ("create-table", 123)]);

        let applied = ledger.list().await.unwrap();
        let ids: Vec<_> = applied.iter().map(MigrationUnit::id).collect();
        assert_eq!(ids, vec!["123-create-table", "456-drop-table"]);
    }

    #[tokio::test]
    async fn test_list_breaks_ties_by_name() {
        let (db, ledger) = ledger();
        db.seed_ledger("migrations", &[("zeta", 100), ("alpha", 100), ("first", 50)]);

        let applied = ledger.list().await.unwrap();
        let ids: Vec<_> = applied.iter().map(MigrationUnit::id).collect();
        assert_eq!(ids, vec!["50-first", "100-alpha", "100-zeta"]);
    }

    #[tokio::test]
    async fn test_record_within_transaction() {
        let (db, ledger) = ledger();
        ledger.ensure_schema().await.unwrap();

        let unit = MigrationUnit::new("create-users", 1, "/m/1-create-users");
        let tx = db.begin().await.unwrap();
        ledger.record(&unit, tx).await.unwrap();
        assert!(db.ledger("migrations").is_empty());

        db.commit(tx).await.unwrap();
        let rows = db.ledger("migrations");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "create-users");
        assert_eq!(rows[0].timestamp, 1);
    }

    #[tokio::test]
    async fn test_record_duplicate() {
        let (db, ledger) = ledger();
        db.seed_ledger("migrations", &[("create-users", 1)]);

        let unit = MigrationUnit::new("create-users", 1, "");
        let tx = db.begin().await.unwrap();
        let err = ledger.record(&unit, tx).await.unwrap_err();
        assert!(matches!(err, DunaError::DuplicateMigration { ref migration } if migration == "1-create-users"));
        db.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_other_failure_is_ledger_error() {
        let (db, ledger) = ledger();
        ledger.ensure_schema().await.unwrap();
        db.fail_insert_of("create-users");

        let unit = MigrationUnit::new("create-users", 1, "");
        let tx = db.begin().await.unwrap();
        let err = ledger.record(&unit, tx).await.unwrap_err();
        assert!(matches!(err, DunaError::Ledger { .. }));
        db.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_table() {
        let db = Arc::new(MockDatabase::new());
        let ledger = Ledger::with_table(db.clone(), "schema_ledger");
        ledger.ensure_schema().await.unwrap();

        assert!(db.has_table("schema_ledger"));
        assert!(!db.has_table("migrations"));
    }
}
