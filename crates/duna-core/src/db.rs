//! Transactional database access.
//!
//! [`DatabaseAccess`] is the narrow capability the migration engine needs:
//! a transaction lifecycle plus `exec`/`query` with an optional ambient
//! transaction. Passing `None` runs the statement directly on the
//! connection, outside any transaction.

use futures::future::BoxFuture;

use crate::error::Result;

/// Opaque handle to an open transaction.
///
/// Handles are issued by [`DatabaseAccess::begin`] and become invalid once the
/// transaction is committed or rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(u64);

impl TxHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A bind parameter or a column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

/// A single result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Value at a column position.
    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Value of a named column.
    pub fn get_named(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Transactional exec/query over one database.
///
/// All calls hit the live database; nothing is buffered or retried.
pub trait DatabaseAccess: Send + Sync {
    /// Open a transaction.
    fn begin(&self) -> BoxFuture<'_, Result<TxHandle>>;

    /// Commit a transaction. Fails with `TransactionAlreadyClosed` if the
    /// handle was already committed or rolled back.
    fn commit(&self, tx: TxHandle) -> BoxFuture<'_, Result<()>>;

    /// Roll back a transaction. Fails with `TransactionAlreadyClosed` if the
    /// handle was already committed or rolled back.
    fn rollback(&self, tx: TxHandle) -> BoxFuture<'_, Result<()>>;

    /// Execute a statement, returning the number of affected rows.
    fn exec<'a>(
        &'a self,
        tx: Option<TxHandle>,
        statement: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<u64>>;

    /// Run a query and collect its rows.
    fn query<'a>(
        &'a self,
        tx: Option<TxHandle>,
        statement: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<Row>>>;
}
