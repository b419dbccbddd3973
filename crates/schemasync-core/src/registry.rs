//! Model registry: the declared entities of one process run
//!
//! Feature modules register their entities once at startup. The resulting
//! snapshot is immutable and is passed explicitly to everything that needs it.

use crate::schema::{enum_type_name, ConstraintKind, EntityDefinition, LogicalType};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

/// Maximum identifier length accepted by the target database
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A source of entity definitions
pub trait FeatureModule {
    /// Module name, used in conflict reports
    fn name(&self) -> &str;

    /// Entities contributed by this module
    fn entities(&self) -> Vec<EntityDefinition>;
}

/// Errors raised while building the registry
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error(
        "Entity '{entity}' registered by '{first_module}' and '{second_module}' with conflicting types for field '{field}'"
    )]
    DuplicateEntity {
        entity: String,
        first_module: String,
        second_module: String,
        field: String,
    },

    #[error("Invalid entity '{entity}': {reason}")]
    InvalidEntity { entity: String, reason: String },
}

#[derive(Debug, Clone)]
struct Registration {
    module: String,
    entity: EntityDefinition,
}

/// Mutable registry used while feature modules load
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, Registration>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named entity
    ///
    /// Re-registering an identical definition is a no-op. A definition from a
    /// different module that gives a shared field another type is rejected.
    pub fn register(&mut self, module: &str, entity: EntityDefinition) -> Result<(), RegistryError> {
        validate_entity(&entity)?;

        if let Some(existing) = self.entries.get(&entity.name) {
            if existing.entity == entity {
                return Ok(());
            }

            if existing.module != module {
                for field in &entity.fields {
                    if let Some(previous) = existing.entity.find_field(&field.name) {
                        if previous.logical_type != field.logical_type {
                            return Err(RegistryError::DuplicateEntity {
                                entity: entity.name.clone(),
                                first_module: existing.module.clone(),
                                second_module: module.to_string(),
                                field: field.name.clone(),
                            });
                        }
                    }
                }
            }

            tracing::warn!(
                entity = %entity.name,
                previous_module = %existing.module,
                module,
                "entity definition replaced"
            );
        }

        self.entries.insert(
            entity.name.clone(),
            Registration {
                module: module.to_string(),
                entity,
            },
        );
        Ok(())
    }

    /// Register every entity of a feature module
    pub fn load_module(&mut self, module: &dyn FeatureModule) -> Result<(), RegistryError> {
        for entity in module.entities() {
            self.register(module.name(), entity)?;
        }
        Ok(())
    }

    /// Module that registered an entity
    pub fn owner(&self, entity: &str) -> Option<&str> {
        self.entries.get(entity).map(|r| r.module.as_str())
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immutable view of the current set
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entities: Arc::new(
                self.entries
                    .iter()
                    .map(|(name, r)| (name.clone(), r.entity.clone()))
                    .collect(),
            ),
        }
    }
}

/// Immutable set of entity definitions, ordered by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    entities: Arc<BTreeMap<String, EntityDefinition>>,
}

impl RegistrySnapshot {
    /// Build a snapshot directly from definitions
    ///
    /// Every definition goes through registration, so the same validation
    /// applies.
    pub fn from_entities(
        entities: impl IntoIterator<Item = EntityDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut registry = ModelRegistry::new();
        for entity in entities {
            registry.register("inline", entity)?;
        }
        Ok(registry.snapshot())
    }

    /// Look up an entity by name
    pub fn get(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    /// Whether an entity is declared
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Entities in name order
    pub fn entities(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.values()
    }

    /// Entity names in order
    pub fn names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier regex"))
}

/// Check that a name is a usable unquoted identifier
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN && identifier_pattern().is_match(name)
}

fn validate_entity(entity: &EntityDefinition) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidEntity {
        entity: entity.name.clone(),
        reason,
    };

    if !is_valid_identifier(&entity.name) {
        return Err(invalid("name is not a valid identifier".to_string()));
    }

    if entity.fields.is_empty() {
        return Err(invalid("entity declares no fields".to_string()));
    }

    let mut names = HashSet::new();
    for field in &entity.fields {
        if !is_valid_identifier(&field.name) {
            return Err(invalid(format!("field '{}' is not a valid identifier", field.name)));
        }
        if !names.insert(field.name.as_str()) {
            return Err(invalid(format!("field '{}' declared twice", field.name)));
        }
        if field.is_primary_key() && field.nullable {
            return Err(invalid(format!("id field '{}' cannot be nullable", field.name)));
        }
        if let LogicalType::Enum { values } = &field.logical_type {
            if values.is_empty() {
                return Err(invalid(format!("enum field '{}' has no values", field.name)));
            }
            let type_name = enum_type_name(&entity.name, &field.name);
            if type_name.len() > MAX_IDENTIFIER_LEN {
                return Err(invalid(format!(
                    "enum type name '{}' exceeds {} bytes",
                    type_name, MAX_IDENTIFIER_LEN
                )));
            }
        }
    }

    if entity.primary_key().len() > 1 {
        return Err(invalid("more than one id field".to_string()));
    }

    for index in &entity.indexes {
        if index.fields.is_empty() {
            return Err(invalid("index without fields".to_string()));
        }
        if let Some(missing) = index.fields.iter().find(|f| !names.contains(f.as_str())) {
            return Err(invalid(format!("index references unknown field '{}'", missing)));
        }
    }

    for index in entity.effective_indexes() {
        let name = index.name_for(&entity.name);
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid(format!(
                "index name '{}' exceeds {} bytes",
                name, MAX_IDENTIFIER_LEN
            )));
        }
        if !identifier_pattern().is_match(&name) {
            return Err(invalid(format!("index name '{}' is not a valid identifier", name)));
        }
    }

    for constraint in &entity.constraints {
        if !is_valid_identifier(&constraint.name) {
            return Err(invalid(format!(
                "constraint '{}' is not a valid identifier",
                constraint.name
            )));
        }
        if let ConstraintKind::ForeignKey { columns, referenced_columns, .. } = &constraint.kind {
            if columns.is_empty() || columns.len() != referenced_columns.len() {
                return Err(invalid(format!(
                    "foreign key '{}' column lists do not line up",
                    constraint.name
                )));
            }
        }
        if let Some(missing) = constraint.columns().iter().find(|c| !names.contains(c.as_str())) {
            return Err(invalid(format!(
                "constraint '{}' references unknown field '{}'",
                constraint.name, missing
            )));
        }
    }

    Ok(())
}
