//! Error taxonomy of the reconciliation engine

use schemasync_catalog::CatalogError;
use schemasync_core::{
    LegacySourceError, ManifestError, ReconciliationReport, RegistryError, SchemaOperation,
};

/// Errors surfaced by the reconciler, verifier, legacy bridge and startup hook
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Conflicting or invalid entity definitions, always fatal at load time
    #[error(transparent)]
    DuplicateEntity(#[from] RegistryError),

    /// Feature-module manifests could not be loaded
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Legacy migration directory could not be read
    #[error(transparent)]
    LegacySource(#[from] LegacySourceError),

    /// The database stayed unreachable after provisioning and one retry
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(CatalogError),

    /// Another instance holds the reconciliation lock
    #[error("Timed out after {waited_ms}ms waiting for the reconciliation lock; another instance is reconciling")]
    LockTimeout { waited_ms: u64 },

    /// One operation was rejected; earlier operations stay applied
    #[error(
        "Failed to apply {operation}: {reason} ({} applied, {} pending)",
        .applied.len(),
        .pending.len()
    )]
    OperationApply {
        operation: Box<SchemaOperation>,
        reason: CatalogError,
        applied: Vec<SchemaOperation>,
        pending: Vec<SchemaOperation>,
        report: Box<ReconciliationReport>,
    },

    /// A pending legacy migration failed; the bridge is not complete
    #[error(
        "Legacy migration {migration} failed: {reason} ({} applied before the failure)",
        .applied.len()
    )]
    LegacyBridge {
        migration: String,
        applied: Vec<String>,
        reason: CatalogError,
    },

    /// Any other catalog failure
    #[error(transparent)]
    Catalog(CatalogError),
}

impl ReconcileError {
    /// Report of the run that failed, when one was produced
    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            Self::OperationApply { report, .. } => Some(report),
            _ => None,
        }
    }
}

impl From<CatalogError> for ReconcileError {
    fn from(error: CatalogError) -> Self {
        if error.is_unavailable() {
            Self::CatalogUnavailable(error)
        } else {
            Self::Catalog(error)
        }
    }
}
