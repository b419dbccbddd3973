//! Read-only drift check for deployment gates
//!
//! Runs inspection, diff and classification and never applies anything.
//! Both additive and destructive differences count as drift.

use crate::executor::{ReconcileOptions, Reconciler};
use schemasync_catalog::CatalogAdapter;
use schemasync_core::{ReconciliationReport, RegistrySnapshot, SyncMode};
use std::sync::Arc;

/// Outcome of a verification run
#[derive(Debug, Clone)]
pub struct Verification {
    /// Whether the catalog differs from the registry
    pub drift_found: bool,

    /// Safe-mode plan, absent when verification itself failed
    pub report: Option<ReconciliationReport>,

    /// Why verification could not complete
    pub failure: Option<String>,
}

impl Verification {
    /// Process exit code: 0 in sync, 1 on drift or failure
    pub fn exit_code(&self) -> i32 {
        if self.drift_found || self.failure.is_some() {
            1
        } else {
            0
        }
    }

    /// Whether the gate passes
    pub fn passed(&self) -> bool {
        self.exit_code() == 0
    }
}

/// Drift checker over one database
pub struct Verifier {
    reconciler: Reconciler,
}

impl Verifier {
    /// Create a verifier
    pub fn new(
        adapter: Arc<dyn CatalogAdapter>,
        registry: RegistrySnapshot,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(adapter, registry, options),
        }
    }

    /// Compare the catalog with the registry
    ///
    /// Errors are folded into the result rather than returned.
    pub async fn verify(&self) -> Verification {
        match self.reconciler.plan(SyncMode::Safe).await {
            Ok(report) => {
                let drift_found = !report.in_sync;
                if drift_found {
                    tracing::warn!(operations = report.operations.len(), "schema drift detected");
                } else {
                    tracing::info!("schema is in sync");
                }
                Verification {
                    drift_found,
                    report: Some(report),
                    failure: None,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "verification failed");
                Verification {
                    drift_found: false,
                    report: None,
                    failure: Some(e.to_string()),
                }
            }
        }
    }
}
