//! Shared fixtures for engine integration tests
//!
//! Entities mirror the marketplace modules: a `widget` used by the
//! reconciliation scenarios, and a market/seller/product group linked by
//! foreign keys.

#![allow(dead_code)]

use schemasync_catalog::MockCatalog;
use schemasync_core::{
    ConstraintDefinition, DefaultValue, EntityDefinition, FieldDefinition, IndexDefinition,
    LogicalType, ReferentialAction, RegistrySnapshot,
};
use schemasync_engine::{ReconcileOptions, Reconciler};
use std::sync::Arc;
use std::time::Duration;

/// `widget{id, name: text, price: integer}`
pub fn widget() -> EntityDefinition {
    EntityDefinition::new("widget")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("name", LogicalType::Text))
        .with_field(FieldDefinition::new("price", LogicalType::Integer))
}

/// `widget` without its `price` field
pub fn widget_without_price() -> EntityDefinition {
    EntityDefinition::new("widget")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("name", LogicalType::Text))
}

/// `widget` plus a required `sku` with no default
pub fn widget_with_sku() -> EntityDefinition {
    widget().with_field(FieldDefinition::new("sku", LogicalType::Text))
}

/// `widget` with an explicitly named index on `name`
pub fn widget_with_named_index(unique: bool) -> EntityDefinition {
    let index = IndexDefinition {
        name: Some("widget_name_idx".to_string()),
        fields: vec!["name".to_string()],
        unique,
    };
    widget().with_index(index)
}

pub fn market() -> EntityDefinition {
    EntityDefinition::new("market")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("name", LogicalType::Varchar { length: 120 }))
        .with_field(FieldDefinition::new("city", LogicalType::Text).with_nullable(true))
        .with_field(
            FieldDefinition::new("opened_at", LogicalType::Timestamp).with_default(DefaultValue::Now),
        )
}

pub fn seller() -> EntityDefinition {
    seller_with_on_delete(ReferentialAction::Cascade)
}

/// `seller` whose market foreign key uses `on_delete`
pub fn seller_with_on_delete(on_delete: ReferentialAction) -> EntityDefinition {
    EntityDefinition::new("seller")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("market_id", LogicalType::Text))
        .with_field(FieldDefinition::new("email", LogicalType::Text).with_unique(true))
        .with_field(
            FieldDefinition::new(
                "tier",
                LogicalType::Enum {
                    values: vec!["basic".into(), "premium".into()],
                },
            )
            .with_default(DefaultValue::Text("basic".into())),
        )
        .with_index(IndexDefinition::new(["market_id"]))
        .with_constraint(
            ConstraintDefinition::foreign_key("seller_market_fk", ["market_id"], "market", ["id"])
                .with_on_delete(on_delete),
        )
}

pub fn product() -> EntityDefinition {
    EntityDefinition::new("product")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("seller_id", LogicalType::Text))
        .with_field(FieldDefinition::new("title", LogicalType::Varchar { length: 200 }))
        .with_field(FieldDefinition::new("price", LogicalType::Float))
        .with_field(FieldDefinition::new("attributes", LogicalType::Json).with_nullable(true))
        .with_field(
            FieldDefinition::new("in_stock", LogicalType::Boolean)
                .with_default(DefaultValue::Boolean(true)),
        )
        .with_constraint(ConstraintDefinition::foreign_key(
            "product_seller_fk",
            ["seller_id"],
            "seller",
            ["id"],
        ))
        .with_constraint(ConstraintDefinition::check("product_price_positive", "price >= 0"))
}

/// Registry snapshot from inline definitions
pub fn registry(entities: Vec<EntityDefinition>) -> RegistrySnapshot {
    RegistrySnapshot::from_entities(entities).expect("valid fixture entities")
}

/// Options with short lock bounds
pub fn fast_options() -> ReconcileOptions {
    ReconcileOptions::default()
        .with_lock_timeout(Duration::from_millis(200), Duration::from_millis(10))
}

/// Reconciler over a mock catalog handle
pub fn reconciler(catalog: &MockCatalog, entities: Vec<EntityDefinition>) -> Reconciler {
    Reconciler::new(Arc::new(catalog.clone()), registry(entities), fast_options())
}
