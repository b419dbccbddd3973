//! Test fixtures for catalog adapter integration tests
//!
//! Reusable entity definitions modeled on small application schemas: a
//! seller/market pair linked by a foreign key and a blog post with an enum.

#![allow(dead_code)]

use schemasync_core::{
    ConstraintDefinition, DefaultValue, EntityDefinition, FieldDefinition, IndexDefinition,
    LogicalType, ReferentialAction,
};

/// A market that sellers belong to
pub fn market_entity() -> EntityDefinition {
    EntityDefinition::new("market")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("name", LogicalType::Varchar { length: 120 }))
        .with_field(FieldDefinition::new("city", LogicalType::Text).with_nullable(true))
}

/// A seller referencing `market`
///
/// Has a unique email, an index on market_id and a check on the stall number.
pub fn seller_entity() -> EntityDefinition {
    EntityDefinition::new("seller")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("market_id", LogicalType::Text))
        .with_field(FieldDefinition::new("email", LogicalType::Text).with_unique(true))
        .with_field(FieldDefinition::new("stall", LogicalType::Integer).with_nullable(true))
        .with_field(
            FieldDefinition::new("active", LogicalType::Boolean)
                .with_default(DefaultValue::Boolean(true)),
        )
        .with_index(IndexDefinition::new(["market_id"]))
        .with_constraint(
            ConstraintDefinition::foreign_key("seller_market_fk", ["market_id"], "market", ["id"])
                .with_on_delete(ReferentialAction::Cascade),
        )
        .with_constraint(ConstraintDefinition::check("seller_stall_check", "stall > 0"))
}

/// A blog post with an enum status and a timestamp default
pub fn blog_post_entity() -> EntityDefinition {
    EntityDefinition::new("blog_post")
        .with_field(FieldDefinition::id("id"))
        .with_field(FieldDefinition::new("title", LogicalType::Text))
        .with_field(
            FieldDefinition::new(
                "status",
                LogicalType::Enum {
                    values: vec!["draft".into(), "published".into()],
                },
            )
            .with_default(DefaultValue::Text("draft".into())),
        )
        .with_field(
            FieldDefinition::new("created_at", LogicalType::Timestamp)
                .with_default(DefaultValue::Now),
        )
}
