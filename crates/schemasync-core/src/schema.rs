//! Declarative entity model and the catalog shape it is compared against
//!
//! `EntityDefinition` is what feature modules declare. `CatalogTable` is what
//! the live database reports. Both speak the same `LogicalType` vocabulary so
//! the differ can compare like with like.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Portable logical type system
///
/// Maps vendor-specific column types to a common representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogicalType {
    /// Text primary key
    Id,

    /// Unbounded text
    Text,

    /// Bounded text
    Varchar { length: u32 },

    /// Integer type (any precision)
    Integer,

    /// Floating point (any precision)
    Float,

    /// Boolean type
    Boolean,

    /// Timestamp (with time component)
    Timestamp,

    /// JSON document
    Json,

    /// Enumeration with its allowed values, in declaration order
    Enum { values: Vec<String> },

    /// Vendor type with no logical counterpart (catalog only)
    Unknown { physical: String },
}

impl LogicalType {
    /// Whether every value of `self` is representable in `target`
    ///
    /// A change that does not widen is treated as narrowing.
    pub fn widens_to(&self, target: &LogicalType) -> bool {
        use LogicalType::*;

        if self == target {
            return true;
        }

        match (self, target) {
            (Integer, Float) => true,
            (Integer | Float | Boolean | Timestamp | Id | Varchar { .. } | Enum { .. }, Text) => true,
            (Varchar { length: from }, Varchar { length: to }) => to >= from,
            (Enum { values: from }, Enum { values: to }) => {
                let target_values: HashSet<&String> = to.iter().collect();
                from.iter().all(|v| target_values.contains(v))
            }
            _ => false,
        }
    }

    /// Whether this is an enumeration
    pub fn is_enum(&self) -> bool {
        matches!(self, LogicalType::Enum { .. })
    }

    /// Physical column type used when this type is materialized
    ///
    /// Enumerations get a dedicated native type named after their column.
    pub fn physical_type(&self, table: &str, column: &str) -> String {
        match self {
            Self::Id | Self::Text => "text".to_string(),
            Self::Varchar { length } => format!("character varying({})", length),
            Self::Integer => "integer".to_string(),
            Self::Float => "double precision".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Timestamp => "timestamp with time zone".to_string(),
            Self::Json => "jsonb".to_string(),
            Self::Enum { .. } => enum_type_name(table, column),
            Self::Unknown { physical } => physical.clone(),
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id => write!(f, "ID"),
            Self::Text => write!(f, "TEXT"),
            Self::Varchar { length } => write!(f, "VARCHAR({})", length),
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
            Self::Enum { values } => write!(f, "ENUM({})", values.join(", ")),
            Self::Unknown { physical } => write!(f, "UNKNOWN({})", physical),
        }
    }
}

/// Name of the native enum type backing `table.column`
pub fn enum_type_name(table: &str, column: &str) -> String {
    format!("{}_{}_enum", table, column)
}

/// Column default value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultValue {
    /// String literal
    Text(String),

    /// Numeric literal, kept verbatim
    Number(String),

    /// Boolean literal
    Boolean(bool),

    /// Current timestamp at insert time
    Now,

    /// Raw SQL expression
    Expression(String),
}

impl DefaultValue {
    /// Render as a SQL expression
    pub fn to_sql(&self) -> String {
        match self {
            Self::Text(value) => format!("'{}'", value.replace('\'', "''")),
            Self::Number(value) => value.clone(),
            Self::Boolean(value) => value.to_string(),
            Self::Now => "now()".to_string(),
            Self::Expression(expr) => expr.clone(),
        }
    }
}

impl std::fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// A declared field of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Column name
    pub name: String,

    /// Logical type
    #[serde(flatten)]
    pub logical_type: LogicalType,

    /// Whether NULL is allowed
    #[serde(default)]
    pub nullable: bool,

    /// Default value expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,

    /// Whether values must be unique
    #[serde(default)]
    pub unique: bool,
}

impl FieldDefinition {
    /// Create a non-null field without default
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: false,
            default: None,
            unique: false,
        }
    }

    /// Create the primary key field
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, LogicalType::Id)
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set default value
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Set uniqueness
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Whether this field is the primary key
    pub fn is_primary_key(&self) -> bool {
        self.logical_type == LogicalType::Id
    }
}

/// Index over an ordered list of fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Explicit index name; derived from the table and fields when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Indexed fields, in order
    pub fields: Vec<String>,

    /// Whether the index enforces uniqueness
    #[serde(default)]
    pub unique: bool,
}

/// Identity of an index for comparison purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    /// Create a non-unique index
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Create a unique index
    pub fn unique<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            unique: true,
            ..Self::new(fields)
        }
    }

    /// Set an explicit name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Comparison key: field tuple plus uniqueness
    pub fn key(&self) -> IndexKey {
        IndexKey {
            fields: self.fields.clone(),
            unique: self.unique,
        }
    }

    /// Physical name of this index on `table`
    pub fn name_for(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "idx_{}_{}{}",
                table,
                self.fields.join("_"),
                if self.unique { "_unique" } else { "" }
            ),
        }
    }
}

/// Action taken on referencing rows when the referenced row is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// SQL spelling
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Kind-specific part of a constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Columns referencing another table
    ForeignKey {
        columns: Vec<String>,
        references: String,
        referenced_columns: Vec<String>,
        #[serde(default)]
        on_delete: ReferentialAction,
    },

    /// Boolean row predicate
    Check { expression: String },
}

/// Identity of a constraint for comparison purposes
///
/// Foreign keys compare by shape. Checks compare by name and by their
/// expression after [`normalize_check_expression`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKey {
    ForeignKey {
        columns: Vec<String>,
        references: String,
        referenced_columns: Vec<String>,
        on_delete: ReferentialAction,
    },
    Check { name: String, expression: String },
}

fn cast_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"::"?[a-z_][a-z0-9_]*"?(?: precision| varying| with time zone| without time zone)?(?:\[\])?"#,
        )
        .expect("valid cast regex")
    })
}

fn atom_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\(([a-z0-9_.]+|'[^']*')\)").expect("valid atom regex")
    })
}

/// Reduce a check expression to a comparable form
///
/// Stored expressions come back with added parentheses, explicit casts and
/// different spacing. Those are removed so a declared `price >= 0` matches a
/// stored `(price >= (0)::double precision)`.
pub fn normalize_check_expression(expression: &str) -> String {
    let lowered = expression.to_lowercase();
    let uncast = cast_pattern().replace_all(&lowered, "");
    let mut compact: String = uncast.chars().filter(|c| !c.is_whitespace()).collect();

    loop {
        let unwrapped = atom_pattern().replace_all(&compact, "$1").into_owned();
        if unwrapped == compact {
            break;
        }
        compact = unwrapped;
    }

    let mut trimmed = compact.as_str();
    while let Some(inner) = strip_outer_parens(trimmed) {
        trimmed = inner;
    }
    trimmed.to_string()
}

/// Inner text when `expression` is wrapped in one matching pair of parentheses
fn strip_outer_parens(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// A table-level constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    /// Constraint name
    pub name: String,

    /// Constraint body
    #[serde(flatten)]
    pub kind: ConstraintKind,

    /// Whether existing rows are validated when the constraint is added
    #[serde(default = "default_true")]
    pub validate_existing: bool,
}

fn default_true() -> bool {
    true
}

impl ConstraintDefinition {
    /// Create a foreign key constraint
    pub fn foreign_key<S: Into<String>>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        references: impl Into<String>,
        referenced_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::ForeignKey {
                columns: columns.into_iter().map(Into::into).collect(),
                references: references.into(),
                referenced_columns: referenced_columns.into_iter().map(Into::into).collect(),
                on_delete: ReferentialAction::NoAction,
            },
            validate_existing: true,
        }
    }

    /// Create a check constraint
    pub fn check(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Check {
                expression: expression.into(),
            },
            validate_existing: true,
        }
    }

    /// Set the delete action (foreign keys only)
    pub fn with_on_delete(mut self, action: ReferentialAction) -> Self {
        if let ConstraintKind::ForeignKey { on_delete, .. } = &mut self.kind {
            *on_delete = action;
        }
        self
    }

    /// Set whether existing rows are validated
    pub fn with_validate_existing(mut self, validate: bool) -> Self {
        self.validate_existing = validate;
        self
    }

    /// Comparison key
    pub fn key(&self) -> ConstraintKey {
        match &self.kind {
            ConstraintKind::ForeignKey {
                columns,
                references,
                referenced_columns,
                on_delete,
            } => ConstraintKey::ForeignKey {
                columns: columns.clone(),
                references: references.clone(),
                referenced_columns: referenced_columns.clone(),
                on_delete: *on_delete,
            },
            ConstraintKind::Check { expression } => ConstraintKey::Check {
                name: self.name.clone(),
                expression: normalize_check_expression(expression),
            },
        }
    }

    /// Table referenced by a foreign key
    pub fn referenced_table(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::ForeignKey { references, .. } => Some(references),
            ConstraintKind::Check { .. } => None,
        }
    }

    /// Columns of this table the constraint covers
    pub fn columns(&self) -> &[String] {
        match &self.kind {
            ConstraintKind::ForeignKey { columns, .. } => columns,
            ConstraintKind::Check { .. } => &[],
        }
    }
}

/// Declared structure of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Stable entity name, also the table name
    pub name: String,

    /// Ordered field list
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,

    /// Declared indexes
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,

    /// Declared constraints
    #[serde(default)]
    pub constraints: Vec<ConstraintDefinition>,
}

impl EntityDefinition {
    /// Create an entity with no fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Append a field
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Append an index
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// Append a constraint
    pub fn with_constraint(mut self, constraint: ConstraintDefinition) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Find a field by name
    pub fn find_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Primary key fields
    pub fn primary_key(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_primary_key())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Declared indexes plus one unique index per unique field
    ///
    /// Duplicates by `(fields, unique)` are dropped, first declaration wins.
    pub fn effective_indexes(&self) -> Vec<IndexDefinition> {
        let mut seen = HashSet::new();
        let unique_fields = self
            .fields
            .iter()
            .filter(|f| f.unique && !f.is_primary_key())
            .map(|f| IndexDefinition::unique([f.name.clone()]));

        self.indexes
            .iter()
            .cloned()
            .chain(unique_fields)
            .filter(|index| seen.insert(index.key()))
            .collect()
    }

    /// Other tables this entity references through foreign keys
    pub fn dependencies(&self) -> Vec<&str> {
        referenced_tables(&self.name, &self.constraints)
    }
}

fn referenced_tables<'a>(own: &str, constraints: &'a [ConstraintDefinition]) -> Vec<&'a str> {
    let mut tables: Vec<&str> = constraints
        .iter()
        .filter_map(|c| c.referenced_table())
        .filter(|t| *t != own)
        .collect();
    tables.sort_unstable();
    tables.dedup();
    tables
}

/// Comparable shape of a column: type, nullability, default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnShape {
    /// Logical type
    pub logical_type: LogicalType,

    /// Physical type name as stored or to be created
    pub physical_type: String,

    /// Whether NULL is allowed
    pub nullable: bool,

    /// Default value
    pub default: Option<DefaultValue>,
}

impl ColumnShape {
    /// Shape a declared field takes on `table`
    pub fn from_field(table: &str, field: &FieldDefinition) -> Self {
        Self {
            logical_type: field.logical_type.clone(),
            physical_type: field.logical_type.physical_type(table, &field.name),
            nullable: field.nullable && !field.is_primary_key(),
            default: field.default.clone(),
        }
    }

    /// Whether two shapes describe the same logical column
    ///
    /// Physical names are not compared: the catalog may use a synonym.
    pub fn same_definition(&self, other: &ColumnShape) -> bool {
        self.logical_type == other.logical_type
            && self.nullable == other.nullable
            && self.default == other.default
    }
}

impl std::fmt::Display for ColumnShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.logical_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {}", default)?;
        }
        Ok(())
    }
}

/// A column as reported by the live catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    /// Column name
    pub name: String,

    /// Normalized logical type
    pub logical_type: LogicalType,

    /// Vendor type name as stored
    pub physical_type: String,

    /// Whether NULL is allowed
    pub nullable: bool,

    /// Normalized default
    pub default: Option<DefaultValue>,

    /// Default expression exactly as stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_default: Option<String>,
}

impl CatalogColumn {
    /// The column a declared field materializes as
    pub fn from_field(table: &str, field: &FieldDefinition) -> Self {
        let shape = ColumnShape::from_field(table, field);
        Self {
            name: field.name.clone(),
            raw_default: shape.default.as_ref().map(DefaultValue::to_sql),
            logical_type: shape.logical_type,
            physical_type: shape.physical_type,
            nullable: shape.nullable,
            default: shape.default,
        }
    }

    /// Comparable shape
    pub fn shape(&self) -> ColumnShape {
        ColumnShape {
            logical_type: self.logical_type.clone(),
            physical_type: self.physical_type.clone(),
            nullable: self.nullable,
            default: self.default.clone(),
        }
    }
}

/// A table as reported by the live catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTable {
    /// Table name
    pub name: String,

    /// Columns in ordinal order
    pub columns: Vec<CatalogColumn>,

    /// Primary key columns
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Secondary indexes (the primary key index is excluded)
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,

    /// Foreign key and check constraints
    #[serde(default)]
    pub constraints: Vec<ConstraintDefinition>,
}

impl CatalogTable {
    /// Create an empty table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// The table an entity materializes as
    pub fn from_entity(entity: &EntityDefinition) -> Self {
        Self {
            name: entity.name.clone(),
            columns: entity
                .fields
                .iter()
                .map(|f| CatalogColumn::from_field(&entity.name, f))
                .collect(),
            primary_key: entity.primary_key().into_iter().map(String::from).collect(),
            indexes: entity
                .effective_indexes()
                .into_iter()
                .map(|index| {
                    let name = index.name_for(&entity.name);
                    index.with_name(name)
                })
                .collect(),
            constraints: entity.constraints.clone(),
        }
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&CatalogColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in ordinal order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Other tables this table references through foreign keys
    pub fn dependencies(&self) -> Vec<&str> {
        referenced_tables(&self.name, &self.constraints)
    }
}
