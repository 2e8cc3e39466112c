use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, PgSslMode, Postgres,
};
use sqlx::query::Query;
use sqlx::{Column, Executor, Row as _, Transaction, TypeInfo};
use tokio::sync::Mutex;
use tracing::debug;

use duna_core::config::DatabaseConfig;
use duna_core::db::{DatabaseAccess, Row, SqlValue, TxHandle};
use duna_core::error::{DunaError, Result};

/// PostgreSQL implementation of [`DatabaseAccess`].
///
/// Open transactions are held by handle so they can be addressed from
/// `exec`/`query` and closed exactly once.
pub struct PgDatabase {
    pool: PgPool,
    open: Mutex<HashMap<TxHandle, Transaction<'static, Postgres>>>,
    next_tx: AtomicU64,
}

impl PgDatabase {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            open: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
        }
    }

    /// Connect using the given configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| DunaError::Database(format!("Failed to connect: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections gracefully. Open transactions are rolled back.
    pub async fn close(&self) {
        self.open.lock().await.clear();
        self.pool.close().await;
    }
}

/// Build connection options from a URL or the discrete fields.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    if let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) {
        return PgConnectOptions::from_str(url)
            .map_err(|e| DunaError::Config(format!("Invalid database url: {}", e)));
    }

    let ssl_mode = PgSslMode::from_str(&config.sslmode)
        .map_err(|e| DunaError::Config(format!("Invalid sslmode '{}': {}", config.sslmode, e)))?;

    Ok(PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.dbname)
        .ssl_mode(ssl_mode))
}

fn map_sqlx_error(e: sqlx::Error) -> DunaError {
    match e.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => {
            DunaError::UniqueViolation(db_err.message().to_string())
        }
        _ => DunaError::Database(e.to_string()),
    }
}

fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

// Argument-free statements go through the simple query protocol, which
// accepts several statements in one string.
async fn exec_on_connection(
    conn: &mut PgConnection,
    statement: &str,
    args: &[SqlValue],
) -> sqlx::Result<u64> {
    let result = if args.is_empty() {
        conn.execute(sqlx::raw_sql(statement)).await?
    } else {
        conn.execute(bind_args(sqlx::query(statement), args)).await?
    };
    Ok(result.rows_affected())
}

async fn exec_on_pool(pool: &PgPool, statement: &str, args: &[SqlValue]) -> sqlx::Result<u64> {
    let result = if args.is_empty() {
        pool.execute(sqlx::raw_sql(statement)).await?
    } else {
        pool.execute(bind_args(sqlx::query(statement), args)).await?
    };
    Ok(result.rows_affected())
}

/// Decode a row into [`SqlValue`]s by column type.
fn decode_row(row: &PgRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(SqlValue::Bool)),
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .map(|v| v.map(|v| SqlValue::Int(v.into()))),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .map(|v| v.map(|v| SqlValue::Int(v.into()))),
            "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .map(|v| v.map(SqlValue::Int)),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map(SqlValue::Text)),
        }
        .map_err(map_sqlx_error)?;

        columns.push(column.name().to_string());
        values.push(value.unwrap_or(SqlValue::Null));
    }

    Ok(Row::new(columns, values))
}

impl DatabaseAccess for PgDatabase {
    fn begin(&self) -> BoxFuture<'_, Result<TxHandle>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DunaError::Database(format!("Unable to begin transaction: {}", e)))?;
            let handle = TxHandle::new(self.next_tx.fetch_add(1, Ordering::Relaxed));
            self.open.lock().await.insert(handle, tx);
            debug!(tx = handle.id(), "Transaction opened");
            Ok(handle)
        })
    }

    fn commit(&self, tx: TxHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let inner = self
                .open
                .lock()
                .await
                .remove(&tx)
                .ok_or(DunaError::TransactionAlreadyClosed)?;
            inner
                .commit()
                .await
                .map_err(|e| DunaError::Database(format!("Transaction commit failed: {}", e)))?;
            debug!(tx = tx.id(), "Transaction committed");
            Ok(())
        })
    }

    fn rollback(&self, tx: TxHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let inner = self
                .open
                .lock()
                .await
                .remove(&tx)
                .ok_or(DunaError::TransactionAlreadyClosed)?;
            inner
                .rollback()
                .await
                .map_err(|e| DunaError::Database(format!("Unable to rollback transaction: {}", e)))?;
            debug!(tx = tx.id(), "Transaction rolled back");
            Ok(())
        })
    }

    fn exec<'a>(
        &'a self,
        tx: Option<TxHandle>,
        statement: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let result = match tx {
                Some(handle) => {
                    let mut open = self.open.lock().await;
                    let inner = open
                        .get_mut(&handle)
                        .ok_or(DunaError::TransactionAlreadyClosed)?;
                    let conn: &mut PgConnection = &mut **inner;
                    exec_on_connection(conn, statement, args).await
                }
                None => exec_on_pool(&self.pool, statement, args).await,
            };

            result.map_err(map_sqlx_error)
        })
    }

    fn query<'a>(
        &'a self,
        tx: Option<TxHandle>,
        statement: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let query = bind_args(sqlx::query(statement), args);
            let rows = match tx {
                Some(handle) => {
                    let mut open = self.open.lock().await;
                    let inner = open
                        .get_mut(&handle)
                        .ok_or(DunaError::TransactionAlreadyClosed)?;
                    query.fetch_all(&mut **inner).await
                }
                None => query.fetch_all(&self.pool).await,
            }
            .map_err(map_sqlx_error)?;

            rows.iter().map(decode_row).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_fields() {
        let config = DatabaseConfig {
            host: "db.internal".into(),
            port: 6543,
            user: "duna".into(),
            password: "pw".into(),
            dbname: "game".into(),
            ..Default::default()
        };

        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "duna");
        assert_eq!(options.get_database(), Some("game"));
    }

    #[test]
    fn test_connect_options_rejects_bad_sslmode() {
        let config = DatabaseConfig {
            sslmode: "sometimes".into(),
            ..Default::default()
        };
        assert!(matches!(
            connect_options(&config),
            Err(DunaError::Config(_))
        ));
    }

    #[test]
    fn test_connect_options_prefers_url() {
        let config = DatabaseConfig {
            url: Some("postgres://u:p@example.com:7000/app".into()),
            host: "ignored".into(),
            ..Default::default()
        };

        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "example.com");
        assert_eq!(options.get_port(), 7000);
    }

    async fn test_db() -> Option<PgDatabase> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let config = DatabaseConfig {
            url: Some(url),
            ..Default::default()
        };
        PgDatabase::from_config(&config).await.ok()
    }

    #[tokio::test]
    async fn test_transaction_lifecycle_against_postgres() {
        let Some(db) = test_db().await else {
            return;
        };

        db.exec(
            None,
            "CREATE TEMP TABLE IF NOT EXISTS duna_pool_tx (name TEXT PRIMARY KEY, n BIGINT NOT NULL)",
            &[],
        )
        .await
        .unwrap();

        let tx = db.begin().await.unwrap();
        db.exec(
            Some(tx),
            "INSERT INTO duna_pool_tx (name, n) VALUES ($1, $2)",
            &[SqlValue::from("a"), SqlValue::from(1i64)],
        )
        .await
        .unwrap();
        db.commit(tx).await.unwrap();

        let err = db.commit(tx).await.unwrap_err();
        assert!(matches!(err, DunaError::TransactionAlreadyClosed));

        let err = db
            .exec(Some(tx), "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DunaError::TransactionAlreadyClosed));

        db.close().await;
    }

    #[tokio::test]
    async fn test_multi_statement_body_against_postgres() {
        let Some(db) = test_db().await else {
            return;
        };

        db.exec(
            None,
            "CREATE TEMP TABLE IF NOT EXISTS duna_pool_multi (n BIGINT NOT NULL);
             INSERT INTO duna_pool_multi (n) VALUES (1);
             INSERT INTO duna_pool_multi (n) VALUES (2);",
            &[],
        )
        .await
        .unwrap();

        let tx = db.begin().await.unwrap();
        db.exec(Some(tx), "INSERT INTO duna_pool_multi (n) VALUES (3); INSERT INTO duna_pool_multi (n) VALUES (4);", &[])
            .await
            .unwrap();
        db.rollback(tx).await.unwrap();

        let rows = db
            .query(None, "SELECT n FROM duna_pool_multi ORDER BY n", &[])
            .await
            .unwrap();
        let values: Vec<_> = rows
            .iter()
            .filter_map(|r| r.get(0).and_then(SqlValue::as_i64))
            .collect();
        assert_eq!(values, vec![1, 2]);

        db.close().await;
    }
}
