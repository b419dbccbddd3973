//! SchemaSync Core
//!
//! Domain model shared by every schemasync crate: declared entities, the live
//! catalog shape, structural operations, reports and configuration.
//! The report schema is versioned; do not rename serialized fields.

pub mod schema;
pub mod operation;
pub mod registry;
pub mod manifest;
pub mod legacy;
pub mod report;
pub mod config;

pub use schema::{
    CatalogColumn, CatalogTable, ColumnShape, ConstraintDefinition, ConstraintKey, ConstraintKind,
    DefaultValue, EntityDefinition, FieldDefinition, IndexDefinition, IndexKey, LogicalType,
    ReferentialAction, normalize_check_expression,
};
pub use operation::{ClassifiedOperation, OperationKind, OperationOutcome, SafetyLabel, SchemaOperation};
pub use registry::{FeatureModule, ModelRegistry, RegistryError, RegistrySnapshot};
pub use manifest::{load_registry, ManifestError, ModuleManifest};
pub use legacy::{LegacyMigration, LegacySourceError, MigrationRecord, MigrationSource, MigrationStatus};
pub use report::{ReconciliationReport, ReportProvenance, ReportSummary, ReportVersion};
pub use config::{
    Config, ConfigError, DatabaseConfig, Environment, IgnoreRules, LegacyConfig, LockConfig,
    SyncConfig, SyncMode,
};
