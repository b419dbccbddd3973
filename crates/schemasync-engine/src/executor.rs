//! Reconciliation executor
//!
//! Runs the full cycle against one database:
//! 1. Provision the database if it is missing
//! 2. Take the reconciliation lock
//! 3. Inspect the catalog (provision and retry once if unavailable)
//! 4. Diff against the registry snapshot and classify every operation
//! 5. Apply operations one at a time, withholding destructive ones in safe mode
//!
//! The first rejected operation stops the run. Operations applied before it
//! stay applied.

use crate::classifier::classify_all;
use crate::differ::diff;
use crate::error::ReconcileError;
use crate::lock::ReconcileLock;
use schemasync_catalog::CatalogAdapter;
use schemasync_core::{
    CatalogTable, ClassifiedOperation, Config, IgnoreRules, OperationOutcome, ReconciliationReport,
    RegistrySnapshot, ReportProvenance, SchemaOperation, SyncMode,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunables of a reconciliation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Give up waiting for the lock after this long
    pub lock_timeout: Duration,

    /// Delay between lock attempts
    pub poll_interval: Duration,

    /// Tables never diffed, created or dropped
    pub ignore: IgnoreRules,

    /// Legacy migration history table, always ignored
    pub history_table: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ReconcileOptions {
    /// Options from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_timeout: config.lock.timeout(),
            poll_interval: config.lock.poll_interval(),
            ignore: config.ignore.clone(),
            history_table: config.legacy.history_table.clone(),
        }
    }

    /// Set the lock bounds
    pub fn with_lock_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.lock_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Whether a live table is outside reconciliation
    pub fn is_ignored(&self, table: &str) -> bool {
        table == self.history_table || self.ignore.is_table_ignored(table)
    }
}

/// Create the target database if it is missing, retrying once when the
/// server is unreachable
///
/// Returns `true` when the database was created.
pub(crate) async fn provision(adapter: &dyn CatalogAdapter) -> Result<bool, ReconcileError> {
    match adapter.ensure_database().await {
        Ok(created) => Ok(created),
        Err(e) if e.is_unavailable() => {
            tracing::warn!(error = %e, "database unreachable during provisioning; retrying once");
            adapter
                .ensure_database()
                .await
                .map_err(ReconcileError::CatalogUnavailable)
        }
        Err(e) => Err(e.into()),
    }
}

/// Reconciles one database with a registry snapshot
pub struct Reconciler {
    adapter: Arc<dyn CatalogAdapter>,
    registry: RegistrySnapshot,
    options: ReconcileOptions,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        adapter: Arc<dyn CatalogAdapter>,
        registry: RegistrySnapshot,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            adapter,
            registry,
            options,
        }
    }

    /// Registry snapshot being reconciled
    pub fn registry(&self) -> &RegistrySnapshot {
        &self.registry
    }

    /// Compute the report `reconcile(mode)` would start from, without the
    /// lock and without applying anything
    ///
    /// A database that does not exist yet is planned as empty.
    pub async fn plan(&self, mode: SyncMode) -> Result<ReconciliationReport, ReconcileError> {
        let started = Instant::now();

        let catalog = match self.adapter.inspect().await {
            Ok(tables) => tables,
            Err(schemasync_catalog::CatalogError::DatabaseMissing(database)) => {
                tracing::info!(%database, "database does not exist yet; planning against an empty catalog");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let (operations, tables_inspected) = self.classified(mode, catalog);
        Ok(self.report(mode, operations, tables_inspected, started))
    }

    /// Bring the database in line with the registry
    pub async fn reconcile(&self, mode: SyncMode) -> Result<ReconciliationReport, ReconcileError> {
        let started = Instant::now();
        tracing::info!(
            %mode,
            adapter = self.adapter.name(),
            database = self.adapter.database(),
            entities = self.registry.len(),
            "starting schema reconciliation"
        );

        if provision(&*self.adapter).await? {
            tracing::info!(database = self.adapter.database(), "provisioned missing database");
        }

        let lock = ReconcileLock::acquire(
            &*self.adapter,
            self.options.lock_timeout,
            self.options.poll_interval,
        )
        .await?;

        let result = self.reconcile_locked(mode, started).await;
        lock.release().await;
        result
    }

    async fn reconcile_locked(
        &self,
        mode: SyncMode,
        started: Instant,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let catalog = self.inspect_with_retry().await?;
        let (mut operations, tables_inspected) = self.classified(mode, catalog);

        for index in 0..operations.len() {
            let entry = &operations[index];
            if entry.outcome == OperationOutcome::Skipped {
                continue;
            }

            tracing::info!(
                operation = %entry.operation,
                label = %entry.label,
                reason = %entry.reason,
                "applying schema operation"
            );

            let result = self.adapter.apply(&entry.operation).await;
            match result {
                Ok(()) => operations[index].outcome = OperationOutcome::Applied,
                Err(reason) => {
                    tracing::error!(
                        operation = %operations[index].operation,
                        error = %reason,
                        "schema operation failed; stopping"
                    );
                    operations[index].outcome = OperationOutcome::Failed;
                    return Err(self.apply_failure(
                        mode,
                        operations,
                        index,
                        reason,
                        tables_inspected,
                        started,
                    ));
                }
            }
        }

        let report = self.report(mode, operations, tables_inspected, started);
        let summary = report.summary();
        tracing::info!(
            applied = summary.applied,
            skipped = summary.skipped,
            duration_ms = report.duration_ms,
            "schema reconciliation finished"
        );
        Ok(report)
    }

    /// Inspect the catalog, provisioning and retrying once when it is unavailable
    async fn inspect_with_retry(&self) -> Result<Vec<CatalogTable>, ReconcileError> {
        match self.adapter.inspect().await {
            Ok(tables) => Ok(tables),
            Err(e) if e.is_unavailable() => {
                tracing::warn!(error = %e, "catalog unavailable; provisioning and retrying once");
                self.adapter
                    .ensure_database()
                    .await
                    .map_err(ReconcileError::CatalogUnavailable)?;
                self.adapter
                    .inspect()
                    .await
                    .map_err(ReconcileError::CatalogUnavailable)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Diff, classify and render; returns the operations and the number of
    /// tables considered
    fn classified(
        &self,
        mode: SyncMode,
        catalog: Vec<CatalogTable>,
    ) -> (Vec<ClassifiedOperation>, usize) {
        let catalog: Vec<CatalogTable> = catalog
            .into_iter()
            .filter(|table| {
                let ignored = self.options.is_ignored(&table.name);
                if ignored {
                    tracing::debug!(table = %table.name, "ignoring table");
                }
                !ignored
            })
            .collect();

        let operations = classify_all(diff(self.registry.entities(), &catalog))
            .into_iter()
            .map(|entry| {
                let statements = self.adapter.render(&entry.operation);
                let mut entry = entry.with_statements(statements);
                if mode == SyncMode::Safe && entry.label.is_destructive() {
                    tracing::warn!(
                        operation = %entry.operation,
                        reason = %entry.reason,
                        "safe mode: skipping destructive operation"
                    );
                    entry.outcome = OperationOutcome::Skipped;
                }
                entry
            })
            .collect();

        (operations, catalog.len())
    }

    fn report(
        &self,
        mode: SyncMode,
        operations: Vec<ClassifiedOperation>,
        tables_inspected: usize,
        started: Instant,
    ) -> ReconciliationReport {
        ReconciliationReport::new(mode, operations)
            .with_provenance(ReportProvenance {
                adapter: self.adapter.name().to_string(),
                database: self.adapter.database().to_string(),
                entities_declared: self.registry.len(),
                tables_inspected,
                ..ReportProvenance::default()
            })
            .with_duration(started.elapsed())
    }

    fn apply_failure(
        &self,
        mode: SyncMode,
        operations: Vec<ClassifiedOperation>,
        failed: usize,
        reason: schemasync_catalog::CatalogError,
        tables_inspected: usize,
        started: Instant,
    ) -> ReconcileError {
        let select = |range: &[ClassifiedOperation], outcome: OperationOutcome| -> Vec<SchemaOperation> {
            range
                .iter()
                .filter(|op| op.outcome == outcome)
                .map(|op| op.operation.clone())
                .collect()
        };

        let applied = select(&operations[..failed], OperationOutcome::Applied);
        let pending = select(&operations[failed + 1..], OperationOutcome::Pending);
        let operation = Box::new(operations[failed].operation.clone());
        let report = self.report(mode, operations, tables_inspected, started);

        ReconcileError::OperationApply {
            operation,
            reason,
            applied,
            pending,
            report: Box::new(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_catalog::MockCatalog;
    use schemasync_core::{EntityDefinition, FieldDefinition, LogicalType};

    fn widget() -> EntityDefinition {
        EntityDefinition::new("widget")
            .with_field(FieldDefinition::id("id"))
            .with_field(FieldDefinition::new("name", LogicalType::Text))
    }

    fn reconciler(catalog: &MockCatalog, entities: Vec<EntityDefinition>) -> Reconciler {
        Reconciler::new(
            Arc::new(catalog.clone()),
            RegistrySnapshot::from_entities(entities).unwrap(),
            ReconcileOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_plan_does_not_apply() {
        let catalog = MockCatalog::new();
        let report = reconciler(&catalog, vec![widget()]).plan(SyncMode::Full).await.unwrap();

        assert_eq!(report.operations.len(), 1);
        assert_eq!(report.operations[0].outcome, OperationOutcome::Pending);
        assert!(!report.operations[0].statements.is_empty());
        assert!(catalog.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_plan_against_missing_database() {
        let catalog = MockCatalog::without_database();
        let report = reconciler(&catalog, vec![widget()]).plan(SyncMode::Safe).await.unwrap();

        assert_eq!(report.operations.len(), 1);
        assert!(!catalog.database_exists().await);
    }

    #[tokio::test]
    async fn test_reconcile_provisions_missing_database() {
        let catalog = MockCatalog::without_database();
        let report = reconciler(&catalog, vec![widget()])
            .reconcile(SyncMode::Full)
            .await
            .unwrap();

        assert!(catalog.database_exists().await);
        assert_eq!(report.applied().len(), 1);
        assert_eq!(report.provenance.adapter, "mock");
        assert_eq!(report.provenance.entities_declared, 1);
    }

    #[tokio::test]
    async fn test_ignored_tables_are_left_alone() {
        let catalog = MockCatalog::new();
        catalog
            .add_entity(&EntityDefinition::new("schema_migrations").with_field(FieldDefinition::id("version")))
            .await;
        catalog
            .add_entity(&EntityDefinition::new("analytics_daily").with_field(FieldDefinition::id("id")))
            .await;

        let mut options = ReconcileOptions::default();
        options.ignore.tables.push("analytics_*".to_string());
        let reconciler = Reconciler::new(
            Arc::new(catalog.clone()),
            RegistrySnapshot::from_entities(vec![widget()]).unwrap(),
            options,
        );

        let report = reconciler.reconcile(SyncMode::Full).await.unwrap();
        assert_eq!(report.operations.len(), 1);
        assert_eq!(report.provenance.tables_inspected, 0);
        assert_eq!(
            catalog.table_names().await,
            vec!["analytics_daily", "schema_migrations", "widget"]
        );
    }

    #[tokio::test]
    async fn test_lock_is_released_after_failure() {
        let catalog = MockCatalog::new();
        catalog.fail_operation("widget", "permission denied").await;

        let result = reconciler(&catalog, vec![widget()]).reconcile(SyncMode::Full).await;
        assert!(matches!(result, Err(ReconcileError::OperationApply { .. })));

        let key = schemasync_catalog::lock_key(schemasync_catalog::RECONCILE_LOCK_SCOPE);
        assert_eq!(catalog.lock_holder(key).await, None);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let catalog = MockCatalog::new();
        catalog.fail_connection_times(1).await;

        let report = reconciler(&catalog, vec![widget()])
            .reconcile(SyncMode::Full)
            .await
            .unwrap();
        assert_eq!(report.applied().len(), 1);

        catalog.fail_connection_times(2).await;
        let result = reconciler(&catalog, vec![widget()]).reconcile(SyncMode::Full).await;
        assert!(matches!(result, Err(ReconcileError::CatalogUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unreachable_database() {
        let catalog = MockCatalog::new().with_connection_failure();
        let result = reconciler(&catalog, vec![widget()]).reconcile(SyncMode::Full).await;
        assert!(matches!(result, Err(ReconcileError::CatalogUnavailable(_))));
    }
}
