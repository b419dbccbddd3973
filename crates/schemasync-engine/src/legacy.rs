//! Legacy migration bridge
//!
//! One-time handoff from file-based migrations to declarative sync: applies
//! every migration file not yet recorded in the history table, in version
//! order, under the reconciliation lock. Running it again with nothing
//! pending is a no-op.

use crate::error::ReconcileError;
use crate::executor::{provision, ReconcileOptions};
use crate::lock::ReconcileLock;
use schemasync_catalog::{CatalogAdapter, CatalogError, MigrationHistory};
use schemasync_core::{MigrationRecord, MigrationSource, MigrationStatus};
use std::sync::Arc;
use std::time::Instant;

/// Result of a bridge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeReport {
    /// Migrations applied by this run, in order
    pub applied: Vec<String>,

    /// Migrations that were already recorded
    pub already_applied: usize,

    /// Recorded migrations whose file changed since
    pub modified: Vec<String>,

    /// Recorded migrations with no file
    pub missing: Vec<String>,

    /// Wall-clock duration
    pub duration_ms: u64,
}

impl BridgeReport {
    /// Whether nothing was pending
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies outstanding legacy migrations to one database
pub struct LegacyBridge<A> {
    adapter: Arc<A>,
    source: MigrationSource,
    options: ReconcileOptions,
}

impl<A> LegacyBridge<A>
where
    A: CatalogAdapter + MigrationHistory,
{
    /// Create a bridge over a migration source
    pub fn new(adapter: Arc<A>, source: MigrationSource, options: ReconcileOptions) -> Self {
        Self {
            adapter,
            source,
            options,
        }
    }

    /// Migration files known to the bridge
    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Compare the files against the recorded history without applying
    ///
    /// A database that does not exist yet has an empty history.
    pub async fn status(&self) -> Result<MigrationStatus, ReconcileError> {
        let history = match self.adapter.applied_migrations().await {
            Ok(history) => history,
            Err(CatalogError::DatabaseMissing(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(self.source.status(&history))
    }

    /// Apply every pending migration
    pub async fn run(&self) -> Result<BridgeReport, ReconcileError> {
        let started = Instant::now();

        if provision(&*self.adapter).await? {
            tracing::info!(database = self.adapter.database(), "provisioned missing database");
        }

        let lock = ReconcileLock::acquire(
            &*self.adapter,
            self.options.lock_timeout,
            self.options.poll_interval,
        )
        .await?;

        let result = self.run_locked().await;
        lock.release().await;

        result.map(|mut report| {
            report.duration_ms = started.elapsed().as_millis() as u64;
            report
        })
    }

    async fn run_locked(&self) -> Result<BridgeReport, ReconcileError> {
        let history = self.adapter.applied_migrations().await?;
        let status = self.source.status(&history);

        for (record, migration) in &status.modified {
            tracing::warn!(
                migration = %migration.label(),
                recorded_checksum = %record.checksum,
                file_checksum = %migration.checksum,
                "legacy migration changed after it was applied; not re-applying"
            );
        }
        for record in &status.missing {
            tracing::warn!(
                migration = %record.label(),
                "recorded legacy migration has no file"
            );
        }

        if status.pending.is_empty() {
            tracing::info!(recorded = history.len(), "no pending legacy migrations");
        }

        let mut applied = Vec::with_capacity(status.pending.len());
        for migration in &status.pending {
            tracing::info!(migration = %migration.label(), "applying legacy migration");
            if let Err(reason) = self.adapter.apply_migration(migration).await {
                tracing::error!(
                    migration = %migration.label(),
                    error = %reason,
                    "legacy migration failed; bridge halted"
                );
                return Err(ReconcileError::LegacyBridge {
                    migration: migration.label(),
                    applied,
                    reason,
                });
            }
            applied.push(migration.label());
        }

        Ok(BridgeReport {
            applied,
            already_applied: status.applied.len() + status.modified.len(),
            modified: status.modified.iter().map(|(_, m)| m.label()).collect(),
            missing: status.missing.iter().map(MigrationRecord::label).collect(),
            duration_ms: 0,
        })
    }
}
