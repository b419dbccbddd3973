//! Reconciliation report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::config::SyncMode;
use crate::operation::{ClassifiedOperation, OperationOutcome, SafetyLabel};
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Counts over the operation list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of operations
    pub total: usize,

    /// Additive operations
    pub additive: usize,

    /// Destructive operations
    pub destructive: usize,

    /// Applied to the database
    pub applied: usize,

    /// Withheld by safe mode
    pub skipped: usize,

    /// Rejected by the database
    pub failed: usize,

    /// Not attempted
    pub pending: usize,
}

/// Where and how a report was produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProvenance {
    /// Adapter name (postgres, mock)
    pub adapter: String,

    /// Database name
    pub database: String,

    /// Tool version
    pub tool_version: String,

    /// Entities in the registry snapshot
    pub entities_declared: usize,

    /// Tables read from the catalog (after ignore rules)
    pub tables_inspected: usize,
}

/// Reconciliation report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Wall-clock duration of the run
    pub duration_ms: u64,

    /// Mode the run was planned for
    pub mode: SyncMode,

    /// Provenance metadata
    pub provenance: ReportProvenance,

    /// Operations in apply order
    pub operations: Vec<ClassifiedOperation>,

    /// True iff `operations` is empty
    pub in_sync: bool,
}

impl ReconciliationReport {
    /// Create a report over an operation list
    pub fn new(mode: SyncMode, operations: Vec<ClassifiedOperation>) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_ms: 0,
            mode,
            provenance: ReportProvenance {
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                ..ReportProvenance::default()
            },
            in_sync: operations.is_empty(),
            operations,
        }
    }

    /// Set provenance metadata, keeping the tool version
    pub fn with_provenance(mut self, provenance: ReportProvenance) -> Self {
        let tool_version = std::mem::take(&mut self.provenance.tool_version);
        self.provenance = ReportProvenance {
            tool_version,
            ..provenance
        };
        self
    }

    /// Set the run duration
    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    /// Operations with the given outcome
    pub fn with_outcome(&self, outcome: OperationOutcome) -> Vec<&ClassifiedOperation> {
        self.operations.iter().filter(|op| op.outcome == outcome).collect()
    }

    /// Operations applied to the database
    pub fn applied(&self) -> Vec<&ClassifiedOperation> {
        self.with_outcome(OperationOutcome::Applied)
    }

    /// Operations withheld by safe mode
    pub fn skipped(&self) -> Vec<&ClassifiedOperation> {
        self.with_outcome(OperationOutcome::Skipped)
    }

    /// Whether any destructive operation is present
    pub fn has_destructive(&self) -> bool {
        self.operations.iter().any(|op| op.label.is_destructive())
    }

    /// Summary statistics
    pub fn summary(&self) -> ReportSummary {
        let count_label = |label: SafetyLabel| self.operations.iter().filter(|op| op.label == label).count();
        let count_outcome = |outcome: OperationOutcome| {
            self.operations.iter().filter(|op| op.outcome == outcome).count()
        };

        ReportSummary {
            total: self.operations.len(),
            additive: count_label(SafetyLabel::Additive),
            destructive: count_label(SafetyLabel::Destructive),
            applied: count_outcome(OperationOutcome::Applied),
            skipped: count_outcome(OperationOutcome::Skipped),
            failed: count_outcome(OperationOutcome::Failed),
            pending: count_outcome(OperationOutcome::Pending),
        }
    }

    /// One line per operation: `[outcome] label: description`
    pub fn summary_lines(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|op| format!("[{}] {}: {}", op.outcome, op.label, op.operation))
            .collect()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::SchemaOperation;
    use crate::schema::{CatalogColumn, FieldDefinition, LogicalType};

    fn drop_price() -> ClassifiedOperation {
        let column = CatalogColumn::from_field("widget", &FieldDefinition::new("price", LogicalType::Integer));
        ClassifiedOperation::new(
            SchemaOperation::DropColumn {
                table: "widget".into(),
                column,
            },
            SafetyLabel::Destructive,
            "drops column data",
        )
    }

    #[test]
    fn empty_report_is_in_sync() {
        let report = ReconciliationReport::new(SyncMode::Safe, Vec::new());
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert!(report.in_sync);
        assert_eq!(report.summary(), ReportSummary::default());
        assert!(!report.provenance.tool_version.is_empty());
    }

    #[test]
    fn summary_counts() {
        let mut skipped = drop_price();
        skipped.outcome = OperationOutcome::Skipped;

        let report = ReconciliationReport::new(SyncMode::Safe, vec![skipped]);
        let summary = report.summary();

        assert!(!report.in_sync);
        assert!(report.has_destructive());
        assert_eq!(summary.total, 1);
        assert_eq!(summary.destructive, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(report.skipped().len(), 1);
        assert!(report.applied().is_empty());
        assert_eq!(
            report.summary_lines(),
            vec!["[skipped] destructive: drop column widget.price INTEGER NOT NULL".to_string()]
        );
    }

    #[test]
    fn provenance_keeps_tool_version() {
        let report = ReconciliationReport::new(SyncMode::Full, Vec::new()).with_provenance(ReportProvenance {
            adapter: "mock".into(),
            database: "shop".into(),
            ..ReportProvenance::default()
        });

        assert_eq!(report.provenance.adapter, "mock");
        assert_eq!(report.provenance.tool_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn report_serialization() {
        let report = ReconciliationReport::new(SyncMode::Safe, vec![drop_price()]);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"in_sync\": false"));
        assert!(json.contains("\"drop_column\""));
    }
}
