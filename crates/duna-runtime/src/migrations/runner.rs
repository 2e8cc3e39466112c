//! Migration runner.
//!
//! One run: ensure the ledger exists, list what it holds, discover what is on
//! disk, and apply the remainder strictly in order. Each unit's SQL runs
//! outside any transaction (many dialects refuse DDL inside one); its ledger
//! row is then written in a short transaction of its own.
//!
//! The two steps are not atomic. If recording fails after the SQL succeeded,
//! the schema change stays in effect without a ledger row and the run stops.
//! Nothing is rolled back automatically; re-running will execute that unit's
//! SQL again, so either the body is idempotent or the operator reconciles the
//! ledger by hand first.
//!
//! There is no cross-process lock. Two concurrent runners are separated only
//! by the ledger's primary key; the loser gets `DuplicateMigration`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use duna_core::config::MigrationsConfig;
use duna_core::db::DatabaseAccess;
use duna_core::error::{DunaError, Result};

use super::ledger::Ledger;
use super::source::{DirectorySource, MigrationSource, MigrationUnit};

/// How the pending set is derived from the ledger and the discovered units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Every ledger entry must match the discovered unit at the same
    /// position by name and ordering key.
    VerifiedPrefix,
    /// Skip as many discovered units as the ledger has entries, without
    /// comparing them.
    Positional,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Units applied and recorded by this run, in order.
    pub applied: Vec<MigrationUnit>,
    /// Ledger entries present before the run.
    pub previously_applied: usize,
}

/// Applied and pending units, without running anything.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationUnit>,
    pub pending: Vec<MigrationUnit>,
}

/// Migration runner over an injected database and migration source.
pub struct MigrationRunner {
    db: Arc<dyn DatabaseAccess>,
    source: Arc<dyn MigrationSource>,
    ledger: Ledger,
    mode: DiffMode,
}

impl MigrationRunner {
    pub fn new(db: Arc<dyn DatabaseAccess>, source: Arc<dyn MigrationSource>) -> Self {
        Self {
            ledger: Ledger::new(db.clone()),
            db,
            source,
            mode: DiffMode::VerifiedPrefix,
        }
    }

    /// Runner reading `config.dir` from disk, with the configured ledger
    /// table and diff mode.
    pub fn from_config(db: Arc<dyn DatabaseAccess>, config: &MigrationsConfig) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(DirectorySource::new(config.dir.clone()));
        let mode = if config.verify_applied_prefix {
            DiffMode::VerifiedPrefix
        } else {
            DiffMode::Positional
        };

        Ok(Self::new(db, source)
            .with_table(config.table.clone())
            .with_mode(mode))
    }

    /// Use a different ledger table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.ledger = Ledger::with_table(self.db.clone(), table);
        self
    }

    pub fn with_mode(mut self, mode: DiffMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply every pending migration, stopping at the first error.
    pub async fn run(&self) -> Result<MigrationReport> {
        let status = self.status().await?;
        let previously_applied = status.applied.len();

        if status.pending.is_empty() {
            info!(applied = previously_applied, "Database is up to date");
            return Ok(MigrationReport {
                applied: Vec::new(),
                previously_applied,
            });
        }

        info!(
            pending = status.pending.len(),
            applied = previously_applied,
            "Running pending migrations"
        );

        let mut applied = Vec::with_capacity(status.pending.len());
        for unit in status.pending {
            self.apply(&unit).await?;
            applied.push(unit);
        }

        info!(count = applied.len(), "Migrations complete");
        Ok(MigrationReport {
            applied,
            previously_applied,
        })
    }

    /// Compute applied and pending units. Creates the ledger table if needed.
    pub async fn status(&self) -> Result<MigrationStatus> {
        self.ledger.ensure_schema().await?;

        let applied = self.ledger.list().await?;
        debug!(count = applied.len(), "Already applied migrations");

        let available = self.source.discover()?;
        let pending = pending_units(&applied, &available, self.mode)?.to_vec();

        Ok(MigrationStatus { applied, pending })
    }

    async fn apply(&self, unit: &MigrationUnit) -> Result<()> {
        let id = unit.id();
        info!(migration = %id, "Applying migration");

        let query = self.source.up_query(unit)?;

        self.db
            .exec(None, &query, &[])
            .await
            .map_err(|e| DunaError::Execution {
                migration: id.clone(),
                reason: e.to_string(),
            })?;

        self.record(unit).await?;

        info!(migration = %id, "Migration applied");
        Ok(())
    }

    /// Record `unit` in its own transaction, which is closed on every path.
    async fn record(&self, unit: &MigrationUnit) -> Result<()> {
        let ledger_err = |e: DunaError| DunaError::Ledger {
            migration: unit.id(),
            reason: e.to_string(),
        };

        let tx = self.db.begin().await.map_err(ledger_err)?;

        if let Err(e) = self.ledger.record(unit, tx).await {
            if let Err(rollback_err) = self.db.rollback(tx).await {
                warn!(
                    migration = %unit,
                    error = %rollback_err,
                    "Failed to roll back ledger transaction"
                );
            }
            return Err(e);
        }

        self.db.commit(tx).await.map_err(ledger_err)
    }
}

/// The units of `available` not yet covered by `applied`.
///
/// Both slices are ascending by ordering key. `applied` is expected to be a
/// prefix of `available`; in [`DiffMode::VerifiedPrefix`] this is checked
/// entry by entry.
pub fn pending_units<'a>(
    applied: &[MigrationUnit],
    available: &'a [MigrationUnit],
    mode: DiffMode,
) -> Result<&'a [MigrationUnit]> {
    if applied.len() > available.len() {
        let position = available.len();
        return Err(DunaError::LedgerMismatch {
            position,
            recorded: applied[position].id(),
            discovered: "<none>".to_string(),
        });
    }

    match mode {
        DiffMode::VerifiedPrefix => {
            for (position, (recorded, discovered)) in applied.iter().zip(available).enumerate() {
                if !recorded.same_identity(discovered) {
                    return Err(DunaError::LedgerMismatch {
                        position,
                        recorded: recorded.id(),
                        discovered: discovered.id(),
                    });
                }
            }
        }
        DiffMode::Positional => {
            warn!("Ledger is not checked against migrations on disk (positional diff)");
        }
    }

    Ok(&available[applied.len()..])
}
