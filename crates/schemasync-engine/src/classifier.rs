//! Safety classifier
//!
//! Labels each operation Additive or Destructive from its shape alone.
//! Destructive means the operation can lose data or reject existing rows.
//! Within a list, an add that re-creates an object dropped just before it
//! shares the drop's label.

use crate::differ::named_object;
use schemasync_core::{
    ClassifiedOperation, ColumnShape, OperationKind, SafetyLabel, SchemaOperation,
};
use std::collections::BTreeSet;

/// Label an operation
pub fn classify(operation: &SchemaOperation) -> SafetyLabel {
    assess(operation).0
}

/// Label an operation and explain the label
pub fn assess(operation: &SchemaOperation) -> (SafetyLabel, String) {
    use SafetyLabel::{Additive, Destructive};

    match operation {
        SchemaOperation::CreateTable { .. } => (Additive, "new table".to_string()),

        SchemaOperation::DropTable { .. } => (Destructive, "drops the table and its rows".to_string()),

        SchemaOperation::AddColumn { table, field } => {
            let shape = ColumnShape::from_field(table, field);
            if shape.nullable {
                (Additive, "nullable column".to_string())
            } else if let Some(default) = &shape.default {
                (Additive, format!("existing rows receive the default {}", default))
            } else {
                (
                    Destructive,
                    "NOT NULL without a default fails on existing rows".to_string(),
                )
            }
        }

        SchemaOperation::DropColumn { .. } => {
            (Destructive, "drops the column and its values".to_string())
        }

        SchemaOperation::AlterColumnType { from, to, .. } => {
            if !from.logical_type.widens_to(&to.logical_type) {
                (
                    Destructive,
                    format!("narrows {} to {}", from.logical_type, to.logical_type),
                )
            } else if from.nullable && !to.nullable && to.default.is_none() {
                (
                    Destructive,
                    "sets NOT NULL without a default to backfill".to_string(),
                )
            } else if from.logical_type != to.logical_type {
                (
                    Additive,
                    format!("widens {} to {}", from.logical_type, to.logical_type),
                )
            } else if from.nullable != to.nullable {
                if to.nullable {
                    (Additive, "drops NOT NULL".to_string())
                } else {
                    (Additive, "sets NOT NULL after backfilling the default".to_string())
                }
            } else {
                (Additive, "changes the default".to_string())
            }
        }

        SchemaOperation::AddIndex { .. } => (Additive, "new index".to_string()),

        SchemaOperation::DropIndex { .. } => (Destructive, "drops an index".to_string()),

        SchemaOperation::AddConstraint { constraint, .. } => {
            if constraint.validate_existing {
                (
                    Destructive,
                    "validates existing rows, which may violate it".to_string(),
                )
            } else {
                (Additive, "existing rows are not validated".to_string())
            }
        }

        SchemaOperation::DropConstraint { .. } => (Destructive, "drops a constraint".to_string()),
    }
}

/// Classify every operation, keeping order
///
/// Safe mode withholds the drop half of a same-name replacement, so the add
/// half is labelled destructive too; applied alone it would collide.
pub fn classify_all(operations: Vec<SchemaOperation>) -> Vec<ClassifiedOperation> {
    let mut dropped = BTreeSet::new();

    operations
        .into_iter()
        .map(|operation| {
            let (mut label, mut reason) = assess(&operation);
            if let Some(key) = named_object(&operation) {
                match operation.kind() {
                    OperationKind::DropIndex | OperationKind::DropConstraint => {
                        dropped.insert(key);
                    }
                    _ if dropped.contains(&key) => {
                        label = SafetyLabel::Destructive;
                        reason = format!("replaces {} dropped before it", key.2);
                    }
                    _ => {}
                }
            }
            ClassifiedOperation::new(operation, label, reason)
        })
        .collect()
}
