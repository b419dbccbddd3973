//! Catalog adapter traits: the seam between the engine and a database driver

use schemasync_core::{CatalogTable, LegacyMigration, MigrationRecord, SchemaOperation};
use sha2::{Digest, Sha256};

/// Lock scope shared by reconciliation and the legacy bridge
pub const RECONCILE_LOCK_SCOPE: &str = "schemasync:reconcile";

/// Derive a 64-bit advisory lock key from a scope name
pub fn lock_key(scope: &str) -> i64 {
    let digest = Sha256::digest(scope.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Errors raised by catalog adapters
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Database '{0}' does not exist")]
    DatabaseMissing(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Statement rejected: {reason} (while executing: {statement})")]
    Rejected { statement: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CatalogError {
    /// Whether the catalog could not be reached or does not exist yet
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::DatabaseMissing(_))
    }
}

/// Live database access used by the reconciler
///
/// Implementations introspect one schema, apply one operation per unit of
/// work, and expose a session-scoped advisory lock.
#[async_trait::async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Adapter name (e.g. "postgres", "mock")
    fn name(&self) -> &'static str;

    /// Target database name
    fn database(&self) -> &str;

    /// Test the connection to the database
    async fn test_connection(&self) -> Result<(), CatalogError>;

    /// Create the target database if it is missing
    ///
    /// Returns `true` when the database was created by this call.
    async fn ensure_database(&self) -> Result<bool, CatalogError>;

    /// Read the current structure of every table in the managed schema
    async fn inspect(&self) -> Result<Vec<CatalogTable>, CatalogError>;

    /// Apply one operation as a single unit of work
    async fn apply(&self, operation: &SchemaOperation) -> Result<(), CatalogError>;

    /// Statements `apply` would execute for an operation
    fn render(&self, operation: &SchemaOperation) -> Vec<String>;

    /// Try to take the advisory lock without waiting
    async fn try_lock(&self, key: i64) -> Result<bool, CatalogError>;

    /// Release the advisory lock
    async fn unlock(&self, key: i64) -> Result<(), CatalogError>;
}

/// History of file-based migrations applied before declarative sync
#[async_trait::async_trait]
pub trait MigrationHistory: Send + Sync {
    /// Migrations recorded as applied, in version order
    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, CatalogError>;

    /// Run a migration and record it, atomically
    async fn apply_migration(&self, migration: &LegacyMigration) -> Result<(), CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable() {
        assert_eq!(lock_key(RECONCILE_LOCK_SCOPE), lock_key("schemasync:reconcile"));
        assert_ne!(lock_key(RECONCILE_LOCK_SCOPE), lock_key("something:else"));
    }

    #[test]
    fn unavailable_classification() {
        assert!(CatalogError::Unavailable("refused".into()).is_unavailable());
        assert!(CatalogError::DatabaseMissing("shop".into()).is_unavailable());
        assert!(!CatalogError::Query("syntax".into()).is_unavailable());
    }
}
