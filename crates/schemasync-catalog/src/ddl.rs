//! PostgreSQL DDL rendering
//!
//! Pure functions from `SchemaOperation` to SQL text. Every object is
//! schema-qualified and every identifier quoted.

use schemasync_core::schema::enum_type_name;
use schemasync_core::{
    ColumnShape, ConstraintDefinition, ConstraintKind, EntityDefinition, FieldDefinition,
    IndexDefinition, LogicalType, SchemaOperation,
};

/// Quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema-qualified, quoted name
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Name of the primary key constraint of `table`
pub fn primary_key_name(table: &str) -> String {
    format!("{}_pkey", table)
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn shape_type(schema: &str, shape: &ColumnShape) -> String {
    if shape.logical_type.is_enum() {
        qualified(schema, &shape.physical_type)
    } else {
        shape.physical_type.clone()
    }
}

fn create_enum(schema: &str, type_name: &str, values: &[String]) -> String {
    format!(
        "CREATE TYPE {} AS ENUM ({})",
        qualified(schema, type_name),
        values.iter().map(|v| quote_literal(v)).collect::<Vec<_>>().join(", ")
    )
}

fn column_definition(schema: &str, table: &str, field: &FieldDefinition) -> String {
    let shape = ColumnShape::from_field(table, field);
    let mut definition = format!("{} {}", quote_ident(&field.name), shape_type(schema, &shape));
    if !shape.nullable {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = &shape.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(&default.to_sql());
    }
    definition
}

fn add_primary_key(schema: &str, table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        qualified(schema, table),
        quote_ident(&primary_key_name(table)),
        quote_ident(column)
    )
}

fn drop_primary_key(schema: &str, table: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
        qualified(schema, table),
        quote_ident(&primary_key_name(table))
    )
}

fn create_table(schema: &str, entity: &EntityDefinition) -> Vec<String> {
    let mut statements = Vec::new();

    for field in &entity.fields {
        if let LogicalType::Enum { values } = &field.logical_type {
            statements.push(create_enum(schema, &enum_type_name(&entity.name, &field.name), values));
        }
    }

    let mut items: Vec<String> = entity
        .fields
        .iter()
        .map(|f| column_definition(schema, &entity.name, f))
        .collect();

    let primary_key = entity.primary_key();
    if !primary_key.is_empty() {
        items.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&primary_key_name(&entity.name)),
            column_list(&primary_key)
        ));
    }

    statements.push(format!(
        "CREATE TABLE {} ({})",
        qualified(schema, &entity.name),
        items.join(", ")
    ));

    for index in entity.effective_indexes() {
        statements.push(create_index(schema, &entity.name, &index));
    }
    for constraint in &entity.constraints {
        statements.push(add_constraint(schema, &entity.name, constraint));
    }

    statements
}

fn create_index(schema: &str, table: &str, index: &IndexDefinition) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name_for(table)),
        qualified(schema, table),
        column_list(&index.fields)
    )
}

fn add_constraint(schema: &str, table: &str, constraint: &ConstraintDefinition) -> String {
    let body = match &constraint.kind {
        ConstraintKind::ForeignKey {
            columns,
            references,
            referenced_columns,
            on_delete,
        } => format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            column_list(columns),
            qualified(schema, references),
            column_list(referenced_columns),
            on_delete.as_sql()
        ),
        ConstraintKind::Check { expression } => format!("CHECK ({})", expression),
    };

    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}{}",
        qualified(schema, table),
        quote_ident(&constraint.name),
        body,
        if constraint.validate_existing { "" } else { " NOT VALID" }
    )
}

fn alter_column(schema: &str, table: &str, column: &str, from: &ColumnShape, to: &ColumnShape) -> Vec<String> {
    let target = qualified(schema, table);
    let col = quote_ident(column);
    let alter = |clause: String| format!("ALTER TABLE {} ALTER COLUMN {} {}", target, col, clause);

    let mut statements = Vec::new();
    let type_changed = from.logical_type != to.logical_type;
    let default_dropped = type_changed && from.default.is_some();

    if type_changed {
        if default_dropped {
            statements.push(alter("DROP DEFAULT".to_string()));
        }
        if from.logical_type == LogicalType::Id {
            statements.push(drop_primary_key(schema, table));
        }

        let mut obsolete_type = None;
        if let LogicalType::Enum { values } = &to.logical_type {
            if from.logical_type.is_enum() && from.physical_type == to.physical_type {
                let renamed = format!("{}_old", to.physical_type);
                statements.push(format!(
                    "ALTER TYPE {} RENAME TO {}",
                    qualified(schema, &to.physical_type),
                    quote_ident(&renamed)
                ));
                obsolete_type = Some(renamed);
            } else if from.logical_type.is_enum() {
                obsolete_type = Some(from.physical_type.clone());
            }

            let new_type = qualified(schema, &to.physical_type);
            statements.push(create_enum(schema, &to.physical_type, values));
            statements.push(alter(format!("TYPE {} USING {}::text::{}", new_type, col, new_type)));
        } else {
            if from.logical_type.is_enum() {
                obsolete_type = Some(from.physical_type.clone());
            }

            let physical_changed = from.logical_type.is_enum() || from.physical_type != to.physical_type;
            if physical_changed {
                // Text targets use the assignment cast so overlong values fail instead of truncating
                let clause = match to.logical_type {
                    LogicalType::Text | LogicalType::Varchar { .. } => format!("TYPE {}", to.physical_type),
                    _ => format!("TYPE {} USING {}::{}", to.physical_type, col, to.physical_type),
                };
                statements.push(alter(clause));
            }
        }

        if let Some(obsolete) = obsolete_type {
            statements.push(format!("DROP TYPE {}", qualified(schema, &obsolete)));
        }
    }

    if from.nullable && !to.nullable {
        if let Some(default) = &to.default {
            statements.push(format!(
                "UPDATE {} SET {} = {} WHERE {} IS NULL",
                target,
                col,
                default.to_sql(),
                col
            ));
        }
        statements.push(alter("SET NOT NULL".to_string()));
    } else if !from.nullable && to.nullable {
        statements.push(alter("DROP NOT NULL".to_string()));
    }

    if to.default != from.default || default_dropped {
        match &to.default {
            Some(default) => statements.push(alter(format!("SET DEFAULT {}", default.to_sql()))),
            None if !default_dropped => statements.push(alter("DROP DEFAULT".to_string())),
            None => {}
        }
    }

    if type_changed && to.logical_type == LogicalType::Id {
        statements.push(add_primary_key(schema, table, column));
    }

    statements
}

/// Render the statements that apply `operation` inside `schema`
pub fn render_operation(schema: &str, operation: &SchemaOperation) -> Vec<String> {
    match operation {
        SchemaOperation::CreateTable { entity } => create_table(schema, entity),

        SchemaOperation::DropTable { table } => {
            let mut statements = vec![format!("DROP TABLE {}", qualified(schema, &table.name))];
            for column in table.columns.iter().filter(|c| c.logical_type.is_enum()) {
                statements.push(format!(
                    "DROP TYPE IF EXISTS {}",
                    qualified(schema, &column.physical_type)
                ));
            }
            statements
        }

        SchemaOperation::AddColumn { table, field } => {
            let mut statements = Vec::new();
            if let LogicalType::Enum { values } = &field.logical_type {
                statements.push(create_enum(schema, &enum_type_name(table, &field.name), values));
            }
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                qualified(schema, table),
                column_definition(schema, table, field)
            ));
            if field.is_primary_key() {
                statements.push(add_primary_key(schema, table, &field.name));
            }
            statements
        }

        SchemaOperation::DropColumn { table, column } => {
            let mut statements = vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                qualified(schema, table),
                quote_ident(&column.name)
            )];
            if column.logical_type.is_enum() {
                statements.push(format!(
                    "DROP TYPE IF EXISTS {}",
                    qualified(schema, &column.physical_type)
                ));
            }
            statements
        }

        SchemaOperation::AlterColumnType { table, column, from, to } => {
            alter_column(schema, table, column, from, to)
        }

        SchemaOperation::AddIndex { table, index } => vec![create_index(schema, table, index)],

        SchemaOperation::DropIndex { table, index } => {
            vec![format!("DROP INDEX {}", qualified(schema, &index.name_for(table)))]
        }

        SchemaOperation::AddConstraint { table, constraint } => {
            vec![add_constraint(schema, table, constraint)]
        }

        SchemaOperation::DropConstraint { table, constraint } => vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            qualified(schema, table),
            quote_ident(&constraint.name)
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use schemasync_core::{CatalogColumn, DefaultValue, ReferentialAction};

    fn blog_post() -> EntityDefinition {
        EntityDefinition::new("blog_post")
            .with_field(FieldDefinition::id("id"))
            .with_field(FieldDefinition::new("slug", LogicalType::Text).with_unique(true))
            .with_field(
                FieldDefinition::new(
                    "status",
                    LogicalType::Enum {
                        values: vec!["draft".into(), "published".into()],
                    },
                )
                .with_default(DefaultValue::Text("draft".into())),
            )
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("public", "widget"), "\"public\".\"widget\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn create_table_statements() {
        let statements = render_operation("public", &SchemaOperation::CreateTable { entity: blog_post() });

        assert_eq!(
            statements,
            vec![
                "CREATE TYPE \"public\".\"blog_post_status_enum\" AS ENUM ('draft', 'published')".to_string(),
                "CREATE TABLE \"public\".\"blog_post\" (\"id\" text NOT NULL, \"slug\" text NOT NULL, \
                 \"status\" \"public\".\"blog_post_status_enum\" NOT NULL DEFAULT 'draft', \
                 CONSTRAINT \"blog_post_pkey\" PRIMARY KEY (\"id\"))"
                    .to_string(),
                "CREATE UNIQUE INDEX \"idx_blog_post_slug_unique\" ON \"public\".\"blog_post\" (\"slug\")".to_string(),
            ]
        );
    }

    #[test]
    fn add_and_drop_column() {
        let add = render_operation(
            "public",
            &SchemaOperation::AddColumn {
                table: "widget".into(),
                field: FieldDefinition::new("price", LogicalType::Integer).with_nullable(true),
            },
        );
        assert_eq!(add, vec!["ALTER TABLE \"public\".\"widget\" ADD COLUMN \"price\" integer".to_string()]);

        let drop = render_operation(
            "public",
            &SchemaOperation::DropColumn {
                table: "widget".into(),
                column: CatalogColumn::from_field("widget", &FieldDefinition::new("price", LogicalType::Integer)),
            },
        );
        assert_eq!(drop, vec!["ALTER TABLE \"public\".\"widget\" DROP COLUMN \"price\"".to_string()]);
    }

    #[test]
    fn tighten_nullability_with_backfill() {
        let from = ColumnShape::from_field("widget", &FieldDefinition::new("note", LogicalType::Text).with_nullable(true));
        let to = ColumnShape::from_field(
            "widget",
            &FieldDefinition::new("note", LogicalType::Text).with_default(DefaultValue::Text("".into())),
        );

        let statements = render_operation(
            "public",
            &SchemaOperation::AlterColumnType {
                table: "widget".into(),
                column: "note".into(),
                from,
                to,
            },
        );

        assert_eq!(
            statements,
            vec![
                "UPDATE \"public\".\"widget\" SET \"note\" = '' WHERE \"note\" IS NULL".to_string(),
                "ALTER TABLE \"public\".\"widget\" ALTER COLUMN \"note\" SET NOT NULL".to_string(),
                "ALTER TABLE \"public\".\"widget\" ALTER COLUMN \"note\" SET DEFAULT ''".to_string(),
            ]
        );
    }

    #[test]
    fn enum_values_change_recreates_type() {
        let field = |values: Vec<&str>| {
            FieldDefinition::new(
                "status",
                LogicalType::Enum {
                    values: values.into_iter().map(String::from).collect(),
                },
            )
            .with_default(DefaultValue::Text("draft".into()))
        };

        let statements = render_operation(
            "public",
            &SchemaOperation::AlterColumnType {
                table: "blog_post".into(),
                column: "status".into(),
                from: ColumnShape::from_field("blog_post", &field(vec!["draft", "published"])),
                to: ColumnShape::from_field("blog_post", &field(vec!["draft", "published", "archived"])),
            },
        );

        assert_eq!(statements.len(), 6);
        assert!(statements[0].ends_with("DROP DEFAULT"));
        assert!(statements[1].starts_with("ALTER TYPE \"public\".\"blog_post_status_enum\" RENAME TO"));
        assert!(statements[2].contains("AS ENUM ('draft', 'published', 'archived')"));
        assert!(statements[3].contains("USING \"status\"::text::\"public\".\"blog_post_status_enum\""));
        assert_eq!(statements[4], "DROP TYPE \"public\".\"blog_post_status_enum_old\"");
        assert!(statements[5].ends_with("SET DEFAULT 'draft'"));
    }

    #[test]
    fn widening_to_text_has_no_using_clause() {
        let statements = render_operation(
            "public",
            &SchemaOperation::AlterColumnType {
                table: "widget".into(),
                column: "price".into(),
                from: ColumnShape::from_field("widget", &FieldDefinition::new("price", LogicalType::Integer)),
                to: ColumnShape::from_field("widget", &FieldDefinition::new("price", LogicalType::Text)),
            },
        );

        assert_eq!(
            statements,
            vec!["ALTER TABLE \"public\".\"widget\" ALTER COLUMN \"price\" TYPE text".to_string()]
        );
    }

    #[test]
    fn constraints_and_indexes() {
        let fk = ConstraintDefinition::foreign_key("order_line_order_fk", ["order_id"], "orders", ["id"])
            .with_on_delete(ReferentialAction::Cascade)
            .with_validate_existing(false);

        let statements = render_operation(
            "shop",
            &SchemaOperation::AddConstraint {
                table: "order_line".into(),
                constraint: fk,
            },
        );
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"shop\".\"order_line\" ADD CONSTRAINT \"order_line_order_fk\" FOREIGN KEY (\"order_id\") \
                 REFERENCES \"shop\".\"orders\" (\"id\") ON DELETE CASCADE NOT VALID"
                    .to_string()
            ]
        );

        let drop = render_operation(
            "shop",
            &SchemaOperation::DropIndex {
                table: "widget".into(),
                index: IndexDefinition::new(["name"]).with_name("widget_name_idx"),
            },
        );
        assert_eq!(drop, vec!["DROP INDEX \"shop\".\"widget_name_idx\"".to_string()]);
    }
}
