//! Startup hook
//!
//! Called once during application bootstrap, before the process accepts
//! requests. Development keeps running on failure; production does not.

use crate::error::ReconcileError;
use crate::executor::{ReconcileOptions, Reconciler};
use schemasync_catalog::CatalogAdapter;
use schemasync_core::{ReconciliationReport, RegistrySnapshot, SyncConfig};
use std::sync::Arc;

/// What the startup hook did
#[derive(Debug)]
pub enum StartupOutcome {
    /// Reconciliation is switched off
    Disabled,

    /// Reconciliation ran to completion
    Completed(ReconciliationReport),

    /// Reconciliation failed outside production; the application continues
    Degraded(ReconcileError),
}

impl StartupOutcome {
    /// Report of a completed run
    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Degraded(error) => error.report(),
            Self::Disabled => None,
        }
    }
}

/// Run reconciliation as part of application startup
///
/// The mode comes from `sync`: safe mode in production unless overridden.
/// In production any failure is returned and the caller must abort startup.
pub async fn run_on_startup(
    sync: &SyncConfig,
    adapter: Arc<dyn CatalogAdapter>,
    registry: RegistrySnapshot,
    options: ReconcileOptions,
) -> Result<StartupOutcome, ReconcileError> {
    if !sync.is_enabled() {
        tracing::info!(environment = %sync.environment, "schema sync disabled");
        return Ok(StartupOutcome::Disabled);
    }

    let mode = sync.mode();
    let reconciler = Reconciler::new(adapter, registry, options);

    match reconciler.reconcile(mode).await {
        Ok(report) => {
            for line in report.summary_lines() {
                tracing::info!("{}", line);
            }
            let skipped = report.skipped().len();
            if skipped > 0 {
                tracing::warn!(
                    skipped,
                    "destructive operations were withheld by safe mode; review and apply them deliberately"
                );
            }
            Ok(StartupOutcome::Completed(report))
        }
        Err(e) if sync.environment.is_production() => {
            tracing::error!(error = %e, "schema reconciliation failed; refusing to start");
            Err(e)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "schema reconciliation failed; continuing in development with an unreconciled schema"
            );
            Ok(StartupOutcome::Degraded(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_catalog::MockCatalog;
    use schemasync_core::{EntityDefinition, Environment, FieldDefinition};

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::from_entities(vec![
            EntityDefinition::new("widget").with_field(FieldDefinition::id("id"))
        ])
        .unwrap()
    }

    fn sync(environment: Environment) -> SyncConfig {
        SyncConfig {
            environment,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled() {
        let config = SyncConfig {
            enabled: Some(false),
            ..SyncConfig::default()
        };
        let catalog = MockCatalog::new();
        let outcome = run_on_startup(&config, Arc::new(catalog.clone()), registry(), ReconcileOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, StartupOutcome::Disabled));
        assert!(catalog.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_development_failure_degrades() {
        let catalog = MockCatalog::new().with_connection_failure();
        let outcome = run_on_startup(
            &sync(Environment::Development),
            Arc::new(catalog),
            registry(),
            ReconcileOptions::default(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, StartupOutcome::Degraded(ReconcileError::CatalogUnavailable(_))));
    }

    #[tokio::test]
    async fn test_production_failure_is_fatal() {
        let catalog = MockCatalog::new().with_connection_failure();
        let result = run_on_startup(
            &sync(Environment::Production),
            Arc::new(catalog),
            registry(),
            ReconcileOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(ReconcileError::CatalogUnavailable(_))));
    }

    #[tokio::test]
    async fn test_completed_run_reports() {
        let catalog = MockCatalog::new();
        let outcome = run_on_startup(
            &sync(Environment::Production),
            Arc::new(catalog.clone()),
            registry(),
            ReconcileOptions::default(),
        )
        .await
        .unwrap();

        let report = outcome.report().unwrap();
        assert_eq!(report.applied().len(), 1);
        assert_eq!(catalog.table_names().await, vec!["widget"]);
    }
}
