//! Schema differ: declared entities vs. live catalog
//!
//! Produces the ordered operation list that turns the catalog into the
//! declared shape. Applying the list and diffing again yields nothing.
//!
//! Ordering is by phase (see [`OperationKind::phase`]), then table name,
//! then object name. Table creation follows foreign key dependencies and
//! table removal runs in the reverse order. An index or constraint that keeps
//! its name but changes shape is dropped immediately before it is re-added.

use schemasync_core::{
    CatalogTable, ColumnShape, ConstraintKey, EntityDefinition, IndexKey, OperationKind,
    SchemaOperation,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Compute the operations that reconcile `catalog` with `entities`
pub fn diff<'a>(
    entities: impl IntoIterator<Item = &'a EntityDefinition>,
    catalog: &[CatalogTable],
) -> Vec<SchemaOperation> {
    let declared: BTreeMap<&str, &EntityDefinition> =
        entities.into_iter().map(|e| (e.name.as_str(), e)).collect();
    let live: BTreeMap<&str, &CatalogTable> =
        catalog.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut creates = Vec::new();
    let mut drops = Vec::new();
    let mut changes = Vec::new();

    for (name, entity) in &declared {
        match live.get(name) {
            None => creates.push(*entity),
            Some(table) => diff_table(entity, table, &mut changes),
        }
    }

    for (name, table) in &live {
        if !declared.contains_key(name) {
            drops.push(*table);
        }
    }

    changes.sort_by(|a, b| ordering_key(a).cmp(&ordering_key(b)));
    let changes = pair_replacements(changes);

    let mut operations = Vec::with_capacity(creates.len() + changes.len() + drops.len());

    let create_order = dependency_order(
        creates
            .iter()
            .map(|e| (e.name.as_str(), e.dependencies()))
            .collect(),
    );
    let by_name: HashMap<&str, &EntityDefinition> =
        creates.iter().map(|e| (e.name.as_str(), *e)).collect();
    for name in create_order {
        if let Some(entity) = by_name.get(name) {
            operations.push(SchemaOperation::CreateTable {
                entity: (*entity).clone(),
            });
        }
    }

    operations.extend(changes);

    // Referencing tables go first, so the order is reversed
    let drop_order = dependency_order(
        drops
            .iter()
            .map(|t| (t.name.as_str(), t.dependencies()))
            .collect(),
    );
    let by_name: HashMap<&str, &CatalogTable> = drops.iter().map(|t| (t.name.as_str(), *t)).collect();
    for name in drop_order.into_iter().rev() {
        if let Some(table) = by_name.get(name) {
            operations.push(SchemaOperation::DropTable {
                table: (*table).clone(),
            });
        }
    }

    operations
}

/// Column, index and constraint changes for a table present on both sides
fn diff_table(entity: &EntityDefinition, table: &CatalogTable, out: &mut Vec<SchemaOperation>) {
    let name = &entity.name;

    for field in &entity.fields {
        match table.find_column(&field.name) {
            None => out.push(SchemaOperation::AddColumn {
                table: name.clone(),
                field: field.clone(),
            }),
            Some(column) => {
                let current = column.shape();
                let desired = ColumnShape::from_field(name, field);
                if !desired.same_definition(&current) {
                    out.push(SchemaOperation::AlterColumnType {
                        table: name.clone(),
                        column: field.name.clone(),
                        from: current,
                        to: desired,
                    });
                }
            }
        }
    }

    for column in &table.columns {
        if entity.find_field(&column.name).is_none() {
            out.push(SchemaOperation::DropColumn {
                table: name.clone(),
                column: column.clone(),
            });
        }
    }

    let declared_indexes = entity.effective_indexes();
    let declared_keys: BTreeSet<IndexKey> = declared_indexes.iter().map(|i| i.key()).collect();
    let live_keys: BTreeSet<IndexKey> = table.indexes.iter().map(|i| i.key()).collect();

    for index in &declared_indexes {
        if !live_keys.contains(&index.key()) {
            let index_name = index.name_for(name);
            out.push(SchemaOperation::AddIndex {
                table: name.clone(),
                index: index.clone().with_name(index_name),
            });
        }
    }
    for index in &table.indexes {
        if !declared_keys.contains(&index.key()) {
            out.push(SchemaOperation::DropIndex {
                table: name.clone(),
                index: index.clone(),
            });
        }
    }

    let declared_constraints: BTreeSet<ConstraintKey> =
        entity.constraints.iter().map(|c| c.key()).collect();
    let live_constraints: BTreeSet<ConstraintKey> =
        table.constraints.iter().map(|c| c.key()).collect();

    for constraint in &entity.constraints {
        if !live_constraints.contains(&constraint.key()) {
            out.push(SchemaOperation::AddConstraint {
                table: name.clone(),
                constraint: constraint.clone(),
            });
        }
    }
    for constraint in &table.constraints {
        if !declared_constraints.contains(&constraint.key()) {
            out.push(SchemaOperation::DropConstraint {
                table: name.clone(),
                constraint: constraint.clone(),
            });
        }
    }
}

fn ordering_key(operation: &SchemaOperation) -> (u8, String, String, OperationKind) {
    let kind = operation.kind();
    (
        kind.phase(),
        operation.table().to_string(),
        operation.object_name(),
        kind,
    )
}

/// Index or constraint an add claims or a drop releases
///
/// Drops report the kind of the add they pair with, so a drop and an add of
/// the same object on the same table produce equal keys.
pub(crate) fn named_object(operation: &SchemaOperation) -> Option<(OperationKind, String, String)> {
    let kind = match operation.kind() {
        OperationKind::AddIndex | OperationKind::DropIndex => OperationKind::AddIndex,
        OperationKind::AddConstraint | OperationKind::DropConstraint => OperationKind::AddConstraint,
        _ => return None,
    };
    Some((kind, operation.table().to_string(), operation.object_name()))
}

fn is_drop(operation: &SchemaOperation) -> bool {
    matches!(
        operation.kind(),
        OperationKind::DropIndex | OperationKind::DropConstraint
    )
}

/// Move each drop whose name is re-added to just before that add
fn pair_replacements(changes: Vec<SchemaOperation>) -> Vec<SchemaOperation> {
    let added: BTreeSet<(OperationKind, String, String)> = changes
        .iter()
        .filter(|op| !is_drop(op))
        .filter_map(named_object)
        .collect();

    let mut replaced: BTreeMap<(OperationKind, String, String), SchemaOperation> = BTreeMap::new();
    let mut rest = Vec::with_capacity(changes.len());
    for operation in changes {
        match named_object(&operation) {
            Some(key) if is_drop(&operation) && added.contains(&key) => {
                replaced.insert(key, operation);
            }
            _ => rest.push(operation),
        }
    }

    if replaced.is_empty() {
        return rest;
    }

    let mut ordered = Vec::with_capacity(rest.len() + replaced.len());
    for operation in rest {
        if let Some(drop) = named_object(&operation).and_then(|key| replaced.remove(&key)) {
            ordered.push(drop);
        }
        ordered.push(operation);
    }
    ordered
}

/// Order tables so each comes after the tables it references
///
/// Kahn's algorithm with name order among ready tables. References outside
/// the set are ignored; tables caught in a cycle are appended in name order.
fn dependency_order<'a>(nodes: BTreeMap<&'a str, Vec<&'a str>>) -> Vec<&'a str> {
    let mut remaining: BTreeMap<&str, BTreeSet<&str>> = nodes
        .iter()
        .map(|(name, deps)| {
            let deps = deps
                .iter()
                .copied()
                .filter(|d| d != name && nodes.contains_key(d))
                .collect();
            (*name, deps)
        })
        .collect();

    let mut ordered = Vec::with_capacity(nodes.len());
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(name, _)| *name)
        .collect();

    while let Some(name) = ready.pop_first() {
        remaining.remove(name);
        ordered.push(name);

        for (other, deps) in remaining.iter_mut() {
            if deps.remove(name) && deps.is_empty() {
                ready.insert(*other);
            }
        }
    }

    ordered.extend(remaining.into_keys());
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use schemasync_core::{
        ConstraintDefinition, DefaultValue, FieldDefinition, IndexDefinition, LogicalType,
    };

    fn widget() -> EntityDefinition {
        EntityDefinition::new("widget")
            .with_field(FieldDefinition::id("id"))
            .with_field(FieldDefinition::new("name", LogicalType::Text))
            .with_field(FieldDefinition::new("price", LogicalType::Integer))
    }

    fn kinds(operations: &[SchemaOperation]) -> Vec<OperationKind> {
        operations.iter().map(|op| op.kind()).collect()
    }

    #[test]
    fn test_missing_table_is_created() {
        let ops = diff([&widget()], &[]);
        assert_eq!(ops, vec![SchemaOperation::CreateTable { entity: widget() }]);
    }

    #[test]
    fn test_identical_catalog_has_no_drift() {
        let entity = widget().with_index(IndexDefinition::unique(["name"]));
        let catalog = vec![CatalogTable::from_entity(&entity)];
        assert!(diff([&entity], &catalog).is_empty());
    }

    #[test]
    fn test_undeclared_table_is_dropped() {
        let stale = CatalogTable::from_entity(&EntityDefinition::new("legacy_audit").with_field(FieldDefinition::id("id")));
        let ops = diff(std::iter::empty(), &[stale.clone()]);
        assert_eq!(ops, vec![SchemaOperation::DropTable { table: stale }]);
    }

    #[test]
    fn test_column_changes() {
        let declared = widget()
            .with_field(FieldDefinition::new("sku", LogicalType::Text).with_nullable(true));
        let live = EntityDefinition::new("widget")
            .with_field(FieldDefinition::id("id"))
            .with_field(FieldDefinition::new("name", LogicalType::Varchar { length: 40 }))
            .with_field(FieldDefinition::new("price", LogicalType::Integer))
            .with_field(FieldDefinition::new("legacy_code", LogicalType::Text));
        let catalog = vec![CatalogTable::from_entity(&live)];

        let ops = diff([&declared], &catalog);
        assert_eq!(
            kinds(&ops),
            vec![
                OperationKind::AlterColumnType,
                OperationKind::AddColumn,
                OperationKind::DropColumn,
            ]
        );

        match &ops[0] {
            SchemaOperation::AlterColumnType { column, from, to, .. } => {
                assert_eq!(column, "name");
                assert_eq!(from.logical_type, LogicalType::Varchar { length: 40 });
                assert_eq!(to.logical_type, LogicalType::Text);
            }
            other => panic!("unexpected operation {other}"),
        }
    }

    #[test]
    fn test_default_change_is_an_alteration() {
        let declared = widget();
        let mut live = CatalogTable::from_entity(&declared);
        live.columns[2].default = Some(DefaultValue::Number("0".into()));

        let ops = diff([&declared], &[live]);
        assert_eq!(kinds(&ops), vec![OperationKind::AlterColumnType]);
    }

    #[test]
    fn test_index_comparison_ignores_names() {
        let declared = widget().with_index(IndexDefinition::new(["name", "price"]));
        let mut live = CatalogTable::from_entity(&declared);
        live.indexes[0].name = Some("widget_name_price_idx".into());

        assert!(diff([&declared], &[live.clone()]).is_empty());

        // Uniqueness is part of the identity
        let declared = widget().with_index(IndexDefinition::unique(["name", "price"]));
        let ops = diff([&declared], &[live]);
        assert_eq!(kinds(&ops), vec![OperationKind::AddIndex, OperationKind::DropIndex]);
    }

    #[test]
    fn test_constraint_changes() {
        let declared = widget().with_constraint(ConstraintDefinition::check("widget_price_positive", "price > 0"));
        let live = CatalogTable::from_entity(
            &widget().with_constraint(ConstraintDefinition::check("widget_name_present", "name <> ''")),
        );

        let ops = diff([&declared], &[live]);
        assert_eq!(kinds(&ops), vec![OperationKind::AddConstraint, OperationKind::DropConstraint]);
    }

    #[test]
    fn test_creates_follow_foreign_keys() {
        let market = EntityDefinition::new("market").with_field(FieldDefinition::id("id"));
        let seller = EntityDefinition::new("seller")
            .with_field(FieldDefinition::id("id"))
            .with_field(FieldDefinition::new("market_id", LogicalType::Text))
            .with_constraint(ConstraintDefinition::foreign_key("seller_market_fk", ["market_id"], "market", ["id"]));
        let order_line = EntityDefinition::new("assignment")
            .with_field(FieldDefinition::id("id"))
            .with_field(FieldDefinition::new("seller_id", LogicalType::Text))
            .with_constraint(ConstraintDefinition::foreign_key("assignment_seller_fk", ["seller_id"], "seller", ["id"]));

        let ops = diff([&seller, &order_line, &market], &[]);
        let tables: Vec<&str> = ops.iter().map(|op| op.table()).collect();
        assert_eq!(tables, vec!["market", "seller", "assignment"]);

        // Drops run in reverse
        let catalog: Vec<CatalogTable> = [&market, &seller, &order_line]
            .into_iter()
            .map(CatalogTable::from_entity)
            .collect();
        let ops = diff(std::iter::empty(), &catalog);
        let tables: Vec<&str> = ops.iter().map(|op| op.table()).collect();
        assert_eq!(tables, vec!["assignment", "seller", "market"]);
    }

    #[test]
    fn test_dependency_cycle_falls_back_to_name_order() {
        let nodes = BTreeMap::from([("a", vec!["b"]), ("b", vec!["a"]), ("c", vec![])]);
        assert_eq!(dependency_order(nodes), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_phases_are_ordered() {
        let declared = vec![
            widget()
                .with_field(FieldDefinition::new("sku", LogicalType::Text).with_nullable(true))
                .with_index(IndexDefinition::new(["sku"])),
            EntityDefinition::new("gadget").with_field(FieldDefinition::id("id")),
        ];
        let live = vec![
            CatalogTable::from_entity(
                &EntityDefinition::new("widget")
                    .with_field(FieldDefinition::id("id"))
                    .with_field(FieldDefinition::new("name", LogicalType::Text))
                    .with_field(FieldDefinition::new("price", LogicalType::Integer))
                    .with_field(FieldDefinition::new("old", LogicalType::Text))
                    .with_index(IndexDefinition::new(["old"])),
            ),
            CatalogTable::from_entity(&EntityDefinition::new("stale").with_field(FieldDefinition::id("id"))),
        ];

        let ops = diff(&declared, &live);
        assert_eq!(
            kinds(&ops),
            vec![
                OperationKind::CreateTable,
                OperationKind::AddColumn,
                OperationKind::AddIndex,
                OperationKind::DropIndex,
                OperationKind::DropColumn,
                OperationKind::DropTable,
            ]
        );
        let phases: Vec<u8> = ops.iter().map(|op| op.kind().phase()).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
    }

    #[test]
    fn test_renamed_shape_drops_before_add() {
        let named = |unique: bool| IndexDefinition {
            name: Some("widget_name_idx".to_string()),
            fields: vec!["name".to_string()],
            unique,
        };
        let declared = widget()
            .with_index(named(true))
            .with_index(IndexDefinition::new(["price"]));
        let live = widget()
            .with_field(FieldDefinition::new("old", LogicalType::Text).with_nullable(true))
            .with_index(named(false))
            .with_index(IndexDefinition::new(["old"]));

        let ops = diff([&declared], &[CatalogTable::from_entity(&live)]);
        let names: Vec<(OperationKind, String)> =
            ops.iter().map(|op| (op.kind(), op.object_name())).collect();
        assert_eq!(
            names,
            vec![
                (OperationKind::AddIndex, "idx_widget_price".to_string()),
                (OperationKind::DropIndex, "widget_name_idx".to_string()),
                (OperationKind::AddIndex, "widget_name_idx".to_string()),
                (OperationKind::DropIndex, "idx_widget_old".to_string()),
                (OperationKind::DropColumn, "old".to_string()),
            ]
        );
    }

    #[test]
    fn test_check_expression_change_is_drift() {
        let declared = widget().with_constraint(ConstraintDefinition::check("widget_price_positive", "price > 0"));
        let stored = widget().with_constraint(ConstraintDefinition::check(
            "widget_price_positive",
            "(price >= 0)",
        ));
        let same = widget().with_constraint(ConstraintDefinition::check(
            "widget_price_positive",
            "((price > (0)::integer))",
        ));

        let ops = diff([&declared], &[CatalogTable::from_entity(&stored)]);
        let names: Vec<(OperationKind, String)> =
            ops.iter().map(|op| (op.kind(), op.object_name())).collect();
        assert_eq!(
            names,
            vec![
                (OperationKind::DropConstraint, "widget_price_positive".to_string()),
                (OperationKind::AddConstraint, "widget_price_positive".to_string()),
            ]
        );

        assert!(diff([&declared], &[CatalogTable::from_entity(&same)]).is_empty());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let declared = widget().with_field(FieldDefinition::new("b", LogicalType::Text).with_nullable(true))
            .with_field(FieldDefinition::new("a", LogicalType::Text).with_nullable(true));
        let live = vec![CatalogTable::from_entity(&widget())];

        let first = diff([&declared], &live);
        let second = diff([&declared], &live);
        assert_eq!(first, second);

        let added: Vec<String> = first.iter().map(|op| op.object_name()).collect();
        assert_eq!(added, vec!["a", "b"]);
    }
}
