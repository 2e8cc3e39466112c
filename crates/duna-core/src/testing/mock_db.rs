//! In-memory [`DatabaseAccess`] for testing the migration engine.
//!
//! `MockDatabase` understands just enough SQL to host a ledger table
//! (`CREATE TABLE IF NOT EXISTS`, `INSERT INTO ... (name, timestamp)`,
//! `SELECT name, timestamp ...`). Every other statement is treated as a
//! migration body: it is recorded in the exec log and otherwise ignored.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;

use crate::db::{DatabaseAccess, Row, SqlValue, TxHandle};
use crate::error::{DunaError, Result};

/// A ledger row held by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub name: String,
    pub timestamp: i64,
}

/// Record of a statement executed outside the ledger table.
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub sql: String,
    pub in_transaction: bool,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, Vec<LedgerRow>>,
    create_calls: usize,
    insert_calls: usize,
    executed: Vec<ExecutedStatement>,
    open: HashMap<TxHandle, Vec<(String, LedgerRow)>>,
    next_tx: u64,
    fail_exec: Vec<String>,
    fail_insert: Vec<String>,
    fail_commit: bool,
}

/// Mock database for testing.
///
/// # Example
///
/// ```ignore
/// let db = MockDatabase::new();
/// db.fail_exec_containing("DROP TABLE");
///
/// let err = db.exec(None, "DROP TABLE users", &[]).await.unwrap_err();
/// assert!(matches!(err, DunaError::Database(_)));
/// ```
#[derive(Default)]
pub struct MockDatabase {
    state: Mutex<State>,
}

impl MockDatabase {
    /// Create an empty mock database.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Pre-populate a ledger table (creating it if needed).
    pub fn seed_ledger(&self, table: &str, rows: &[(&str, i64)]) {
        let mut state = self.state();
        let entry = state.tables.entry(table.to_string()).or_default();
        entry.extend(rows.iter().map(|(name, timestamp)| LedgerRow {
            name: name.to_string(),
            timestamp: *timestamp,
        }));
    }

    /// Make every non-ledger exec whose SQL contains `needle` fail.
    pub fn fail_exec_containing(&self, needle: impl Into<String>) {
        self.state().fail_exec.push(needle.into());
    }

    /// Make the ledger insert for the unit named `name` fail.
    pub fn fail_insert_of(&self, name: impl Into<String>) {
        self.state().fail_insert.push(name.into());
    }

    /// Make every commit fail. The transaction is closed regardless.
    pub fn fail_commits(&self) {
        self.state().fail_commit = true;
    }

    /// Committed rows of a ledger table, in insertion order.
    pub fn ledger(&self, table: &str) -> Vec<LedgerRow> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Whether a table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Number of tables.
    pub fn table_count(&self) -> usize {
        self.state().tables.len()
    }

    /// Number of `CREATE TABLE` statements received.
    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Number of ledger inserts attempted.
    pub fn insert_calls(&self) -> usize {
        self.state().insert_calls
    }

    /// Statements executed outside the ledger table.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state().executed.clone()
    }

    /// Number of transactions currently open.
    pub fn open_transactions(&self) -> usize {
        self.state().open.len()
    }

    fn exec_now(&self, tx: Option<TxHandle>, statement: &str, args: &[SqlValue]) -> Result<u64> {
        let mut state = self.state();
        if let Some(tx) = tx {
            if !state.open.contains_key(&tx) {
                return Err(DunaError::TransactionAlreadyClosed);
            }
        }

        let normalized = statement.trim().to_ascii_uppercase();

        if normalized.starts_with("CREATE TABLE IF NOT EXISTS") {
            state.create_calls += 1;
            let table = table_name_after(statement, "EXISTS")?;
            state.tables.entry(table).or_default();
            return Ok(0);
        }

        if normalized.starts_with("INSERT INTO") {
            state.insert_calls += 1;
            let table = table_name_after(statement, "INTO")?;
            let row = ledger_row(args)?;

            if state.fail_insert.iter().any(|n| *n == row.name) {
                return Err(DunaError::Database(format!(
                    "injected insert failure for '{}'",
                    row.name
                )));
            }

            let Some(committed) = state.tables.get(&table) else {
                return Err(DunaError::Database(format!(
                    "relation \"{}\" does not exist",
                    table
                )));
            };
            let pending_dup = state
                .open
                .values()
                .flatten()
                .any(|(t, r)| *t == table && r.name == row.name);
            if pending_dup || committed.iter().any(|r| r.name == row.name) {
                return Err(DunaError::UniqueViolation(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    table
                )));
            }

            match tx {
                Some(tx) => {
                    if let Some(pending) = state.open.get_mut(&tx) {
                        pending.push((table, row));
                    }
                }
                None => {
                    if let Some(rows) = state.tables.get_mut(&table) {
                        rows.push(row);
                    }
                }
            }
            return Ok(1);
        }

        if state.fail_exec.iter().any(|n| statement.contains(n.as_str())) {
            return Err(DunaError::Database(format!(
                "injected failure executing: {}",
                statement
            )));
        }

        state.executed.push(ExecutedStatement {
            sql: statement.to_string(),
            in_transaction: tx.is_some(),
        });
        Ok(0)
    }

    fn query_now(&self, tx: Option<TxHandle>, statement: &str) -> Result<Vec<Row>> {
        let state = self.state();
        if let Some(tx) = tx {
            if !state.open.contains_key(&tx) {
                return Err(DunaError::TransactionAlreadyClosed);
            }
        }

        let table = table_name_after(statement, "FROM")?;
        let Some(rows) = state.tables.get(&table) else {
            return Err(DunaError::Database(format!(
                "relation \"{}\" does not exist",
                table
            )));
        };

        let mut rows = rows.clone();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
        Ok(rows
            .into_iter()
            .map(|r| {
                Row::new(
                    vec!["name".into(), "timestamp".into()],
                    vec![SqlValue::Text(r.name), SqlValue::Int(r.timestamp)],
                )
            })
            .collect())
    }
}

/// The identifier following `keyword` in a statement.
fn table_name_after(statement: &str, keyword: &str) -> Result<String> {
    let mut words = statement.split_whitespace();
    words
        .by_ref()
        .find(|w| w.eq_ignore_ascii_case(keyword))
        .ok_or_else(|| DunaError::Database(format!("mock cannot parse: {}", statement)))?;
    words
        .next()
        .map(|w| {
            w.trim_end_matches(';')
                .split('(')
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .ok_or_else(|| DunaError::Database(format!("mock cannot parse: {}", statement)))
}

fn ledger_row(args: &[SqlValue]) -> Result<LedgerRow> {
    match args {
        [SqlValue::Text(name), SqlValue::Int(timestamp)] => Ok(LedgerRow {
            name: name.clone(),
            timestamp: *timestamp,
        }),
        _ => Err(DunaError::Database(format!(
            "mock expects (name, timestamp) arguments, got {:?}",
            args
        ))),
    }
}

impl DatabaseAccess for MockDatabase {
    fn begin(&self) -> BoxFuture<'_, Result<TxHandle>> {
        Box::pin(async move {
            let mut state = self.state();
            state.next_tx += 1;
            let tx = TxHandle::new(state.next_tx);
            state.open.insert(tx, Vec::new());
            Ok(tx)
        })
    }

    fn commit(&self, tx: TxHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            let pending = state
                .open
                .remove(&tx)
                .ok_or(DunaError::TransactionAlreadyClosed)?;
            if state.fail_commit {
                return Err(DunaError::Database("injected commit failure".into()));
            }
            for (table, row) in pending {
                state.tables.entry(table).or_default().push(row);
            }
            Ok(())
        })
    }

    fn rollback(&self, tx: TxHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state()
                .open
                .remove(&tx)
                .map(|_| ())
                .ok_or(DunaError::TransactionAlreadyClosed)
        })
    }

    fn exec<'a>(
        &'a self,
        tx: Option<TxHandle>,
        statement: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move { self.exec_now(tx, statement, args) })
    }

    fn query<'a>(
        &'a self,
        tx: Option<TxHandle>,
        statement: &'a str,
        _args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move { self.query_now(tx, statement) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE: &str = "CREATE TABLE IF NOT EXISTS migrations (name TEXT PRIMARY KEY, timestamp BIGINT NOT NULL)";
    const INSERT: &str = "INSERT INTO migrations (name, timestamp) VALUES ($1, $2)";
    const SELECT: &str = "SELECT name, timestamp FROM migrations ORDER BY timestamp";

    fn args(name: &str, ts: i64) -> Vec<SqlValue> {
        vec![SqlValue::from(name), SqlValue::from(ts)]
    }

    #[tokio::test]
    async fn test_commit_twice_fails() {
        let db = MockDatabase::new();
        let tx = db.begin().await.unwrap();
        db.commit(tx).await.unwrap();

        let err = db.commit(tx).await.unwrap_err();
        assert!(matches!(err, DunaError::TransactionAlreadyClosed));
    }

    #[tokio::test]
    async fn test_rollback_discards_insert() {
        let db = MockDatabase::new();
        db.exec(None, CREATE, &[]).await.unwrap();

        let tx = db.begin().await.unwrap();
        db.exec(Some(tx), INSERT, &args("init", 1)).await.unwrap();
        db.rollback(tx).await.unwrap();

        assert!(db.ledger("migrations").is_empty());
        assert_eq!(db.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_unique_violation() {
        let db = MockDatabase::new();
        db.exec(None, CREATE, &[]).await.unwrap();
        db.exec(None, INSERT, &args("init", 1)).await.unwrap();

        let err = db.exec(None, INSERT, &args("init", 1)).await.unwrap_err();
        assert!(matches!(err, DunaError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_query_sorted_by_timestamp() {
        let db = MockDatabase::new();
        db.seed_ledger("migrations", &[("b", 20), ("a", 10)]);

        let rows = db.query(None, SELECT, &[]).await.unwrap();
        let names: Vec<_> = rows
            .iter()
            .filter_map(|r| r.get(0).and_then(SqlValue::as_str))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_other_statements_are_logged() {
        let db = MockDatabase::new();
        db.exec(None, "CREATE TABLE users (id INT)", &[]).await.unwrap();

        let executed = db.executed();
        assert_eq!(executed.len(), 1);
        assert!(!executed[0].in_transaction);
        assert!(!db.has_table("users"));
    }
}
