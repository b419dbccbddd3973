//! Structural operations produced by the differ
//!
//! Every operation carries enough data to be applied by a catalog adapter and
//! to be described to an operator.

use serde::{Deserialize, Serialize};
use crate::schema::{
    CatalogColumn, CatalogTable, ColumnShape, ConstraintDefinition, EntityDefinition,
    FieldDefinition, IndexDefinition,
};

/// Operation kinds, declared in apply order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateTable,
    AddColumn,
    AlterColumnType,
    AddIndex,
    AddConstraint,
    DropIndex,
    DropConstraint,
    DropColumn,
    DropTable,
}

impl OperationKind {
    /// Apply phase; operations run phase by phase
    ///
    /// Tables exist before anything is attached to them, and nothing is
    /// dropped while a pending operation may still reference it.
    pub fn phase(&self) -> u8 {
        match self {
            Self::CreateTable => 0,
            Self::AddColumn | Self::AlterColumnType => 1,
            Self::AddIndex | Self::AddConstraint => 2,
            Self::DropIndex | Self::DropConstraint => 3,
            Self::DropColumn => 4,
            Self::DropTable => 5,
        }
    }

    /// Stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTable => "CREATE_TABLE",
            Self::AddColumn => "ADD_COLUMN",
            Self::AlterColumnType => "ALTER_COLUMN_TYPE",
            Self::AddIndex => "ADD_INDEX",
            Self::AddConstraint => "ADD_CONSTRAINT",
            Self::DropIndex => "DROP_INDEX",
            Self::DropConstraint => "DROP_CONSTRAINT",
            Self::DropColumn => "DROP_COLUMN",
            Self::DropTable => "DROP_TABLE",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One structural change to the live database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    /// Create a table with all its columns, indexes and constraints
    CreateTable { entity: EntityDefinition },

    /// Drop a table; carries the catalog snapshot being dropped
    DropTable { table: CatalogTable },

    /// Add a column to an existing table
    AddColumn { table: String, field: FieldDefinition },

    /// Drop a column; carries the catalog column being dropped
    DropColumn { table: String, column: CatalogColumn },

    /// Change type, nullability or default of a column
    AlterColumnType {
        table: String,
        column: String,
        from: ColumnShape,
        to: ColumnShape,
    },

    /// Create an index
    AddIndex { table: String, index: IndexDefinition },

    /// Drop an index; the definition carries the catalog name
    DropIndex { table: String, index: IndexDefinition },

    /// Add a foreign key or check constraint
    AddConstraint { table: String, constraint: ConstraintDefinition },

    /// Drop a foreign key or check constraint
    DropConstraint { table: String, constraint: ConstraintDefinition },
}

impl SchemaOperation {
    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateTable { .. } => OperationKind::CreateTable,
            Self::DropTable { .. } => OperationKind::DropTable,
            Self::AddColumn { .. } => OperationKind::AddColumn,
            Self::DropColumn { .. } => OperationKind::DropColumn,
            Self::AlterColumnType { .. } => OperationKind::AlterColumnType,
            Self::AddIndex { .. } => OperationKind::AddIndex,
            Self::DropIndex { .. } => OperationKind::DropIndex,
            Self::AddConstraint { .. } => OperationKind::AddConstraint,
            Self::DropConstraint { .. } => OperationKind::DropConstraint,
        }
    }

    /// Table the operation targets
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { entity } => &entity.name,
            Self::DropTable { table } => &table.name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumnType { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. } => table,
        }
    }

    /// Name of the column, index or constraint the operation targets
    ///
    /// Table-level operations return an empty string.
    pub fn object_name(&self) -> String {
        match self {
            Self::CreateTable { .. } | Self::DropTable { .. } => String::new(),
            Self::AddColumn { field, .. } => field.name.clone(),
            Self::DropColumn { column, .. } => column.name.clone(),
            Self::AlterColumnType { column, .. } => column.clone(),
            Self::AddIndex { table, index } | Self::DropIndex { table, index } => index.name_for(table),
            Self::AddConstraint { constraint, .. } | Self::DropConstraint { constraint, .. } => {
                constraint.name.clone()
            }
        }
    }

    /// Qualified target, e.g. `widget.price`
    pub fn target(&self) -> String {
        let object = self.object_name();
        if object.is_empty() {
            self.table().to_string()
        } else {
            format!("{}.{}", self.table(), object)
        }
    }
}

impl std::fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateTable { entity } => write!(
                f,
                "create table {} ({} columns, {} indexes, {} constraints)",
                entity.name,
                entity.fields.len(),
                entity.effective_indexes().len(),
                entity.constraints.len()
            ),
            Self::DropTable { table } => {
                write!(f, "drop table {} ({} columns)", table.name, table.columns.len())
            }
            Self::AddColumn { table, field } => write!(
                f,
                "add column {}.{} {}",
                table,
                field.name,
                ColumnShape::from_field(table, field)
            ),
            Self::DropColumn { table, column } => {
                write!(f, "drop column {}.{} {}", table, column.name, column.shape())
            }
            Self::AlterColumnType { table, column, from, to } => {
                write!(f, "alter column {}.{}: {} -> {}", table, column, from, to)
            }
            Self::AddIndex { table, index } => write!(
                f,
                "add {}index {} on {} ({})",
                if index.unique { "unique " } else { "" },
                index.name_for(table),
                table,
                index.fields.join(", ")
            ),
            Self::DropIndex { table, index } => {
                write!(f, "drop index {} on {}", index.name_for(table), table)
            }
            Self::AddConstraint { table, constraint } => {
                write!(f, "add constraint {} on {}", constraint.name, table)
            }
            Self::DropConstraint { table, constraint } => {
                write!(f, "drop constraint {} on {}", constraint.name, table)
            }
        }
    }
}

/// Safety classification of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLabel {
    /// Cannot lose data or reject existing rows
    Additive,

    /// Can lose data or reject existing rows
    Destructive,
}

impl SafetyLabel {
    /// Whether this is `Destructive`
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Destructive)
    }
}

impl std::fmt::Display for SafetyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Additive => write!(f, "additive"),
            Self::Destructive => write!(f, "destructive"),
        }
    }
}

/// What happened to an operation during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationOutcome {
    /// Planned but not (yet) applied
    Pending,

    /// Applied to the database
    Applied,

    /// Withheld by safe mode
    Skipped,

    /// Rejected by the database
    Failed,
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Applied => write!(f, "applied"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An operation together with its safety label and outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedOperation {
    /// The operation
    pub operation: SchemaOperation,

    /// Safety label
    pub label: SafetyLabel,

    /// Why the label was chosen
    pub reason: String,

    /// Statements the adapter would execute
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,

    /// Outcome of the run
    pub outcome: OperationOutcome,
}

impl ClassifiedOperation {
    /// Create a pending entry
    pub fn new(operation: SchemaOperation, label: SafetyLabel, reason: impl Into<String>) -> Self {
        Self {
            operation,
            label,
            reason: reason.into(),
            statements: Vec::new(),
            outcome: OperationOutcome::Pending,
        }
    }

    /// Attach rendered statements
    pub fn with_statements(mut self, statements: Vec<String>) -> Self {
        self.statements = statements;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, LogicalType};

    #[test]
    fn phases_follow_declaration_order() {
        let kinds = [
            OperationKind::CreateTable,
            OperationKind::AddColumn,
            OperationKind::AlterColumnType,
            OperationKind::AddIndex,
            OperationKind::AddConstraint,
            OperationKind::DropIndex,
            OperationKind::DropConstraint,
            OperationKind::DropColumn,
            OperationKind::DropTable,
        ];

        for pair in kinds.windows(2) {
            assert!(pair[0].phase() <= pair[1].phase());
        }
        assert_eq!(OperationKind::DropTable.phase(), 5);
    }

    #[test]
    fn operation_description() {
        let op = SchemaOperation::AddColumn {
            table: "widget".into(),
            field: FieldDefinition::new("sku", LogicalType::Text),
        };

        assert_eq!(op.to_string(), "add column widget.sku TEXT NOT NULL");
        assert_eq!(op.target(), "widget.sku");
        assert_eq!(op.kind(), OperationKind::AddColumn);
    }

    #[test]
    fn operation_serialization() {
        let op = SchemaOperation::DropIndex {
            table: "widget".into(),
            index: IndexDefinition::new(["name"]).with_name("idx_widget_name"),
        };

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"op\":\"drop_index\""));
        assert!(json.contains("idx_widget_name"));
    }
}
