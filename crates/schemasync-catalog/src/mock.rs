//! In-memory catalog adapter for testing
//!
//! This adapter keeps a catalog in memory and applies operations to it
//! structurally, without connecting to any database. It's useful for:
//! - Unit testing the differ and reconciler against a live-like catalog
//! - Reproducing rejections on populated tables
//! - Simulating lock contention between application instances
//! - Demos without a database server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use schemasync_catalog::{CatalogAdapter, MockCatalog};
//!
//! let catalog = MockCatalog::new();
//! catalog.add_entity(&widget).await;
//! catalog.insert_rows("widget", 3).await;
//!
//! // A second handle on the same catalog with its own lock session
//! let other_instance = catalog.session();
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Simulate connection failure
//! let catalog = MockCatalog::new().with_connection_failure();
//!
//! // Reject one operation by target
//! catalog.fail_operation("widget.sku", "disk full").await;
//!
//! // Start without the target database
//! let catalog = MockCatalog::without_database();
//! ```
//!
//! Populated tables are assumed to hold NULLs in every nullable column and
//! values that do not survive a narrowing conversion.

use crate::adapter::{CatalogAdapter, CatalogError, MigrationHistory};
use crate::ddl;
use schemasync_core::{
    CatalogColumn, CatalogTable, EntityDefinition, LegacyMigration, LogicalType, MigrationRecord,
    SchemaOperation,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MockState {
    database_exists: bool,
    tables: BTreeMap<String, CatalogTable>,
    rows: HashMap<String, u64>,
    operation_failures: HashMap<String, String>,
    migration_failures: HashMap<u64, String>,
    history: Vec<MigrationRecord>,
    locks: HashMap<i64, u64>,
    applied: Vec<SchemaOperation>,
    transient_failures: u32,
}

/// In-memory catalog adapter
///
/// Clones share the catalog and the lock session. Use [`MockCatalog::session`]
/// for a handle that behaves like a second application instance.
pub struct MockCatalog {
    state: Arc<RwLock<MockState>>,
    sessions: Arc<AtomicU64>,
    session_id: u64,
    database: String,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockCatalog {
    /// Create an empty catalog in an existing database
    pub fn new() -> Self {
        Self::with_state(MockState {
            database_exists: true,
            ..MockState::default()
        })
    }

    /// Create a catalog whose target database has not been created yet
    pub fn without_database() -> Self {
        Self::with_state(MockState::default())
    }

    fn with_state(state: MockState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            sessions: Arc::new(AtomicU64::new(1)),
            session_id: 0,
            database: "mock".to_string(),
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Configure to fail every call as unreachable
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set the database name reported by `database()`
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// A new handle on the same catalog with its own lock session
    pub fn session(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            sessions: Arc::clone(&self.sessions),
            session_id: self.sessions.fetch_add(1, Ordering::SeqCst),
            database: self.database.clone(),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }

    /// Lock session of this handle
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Put a table into the catalog as-is
    pub async fn add_table(&self, table: CatalogTable) {
        self.state.write().await.tables.insert(table.name.clone(), table);
    }

    /// Put the table an entity materializes as into the catalog
    pub async fn add_entity(&self, entity: &EntityDefinition) {
        self.add_table(CatalogTable::from_entity(entity)).await;
    }

    /// Record rows in a table
    pub async fn insert_rows(&self, table: &str, rows: u64) {
        *self.state.write().await.rows.entry(table.to_string()).or_default() += rows;
    }

    /// Make the operation with the given target (`table` or `table.object`) fail
    pub async fn fail_operation(&self, target: &str, reason: &str) {
        self.state
            .write()
            .await
            .operation_failures
            .insert(target.to_string(), reason.to_string());
    }

    /// Fail the next `times` calls as unreachable, across all handles
    pub async fn fail_connection_times(&self, times: u32) {
        self.state.write().await.transient_failures = times;
    }

    /// Make a legacy migration fail
    pub async fn fail_migration(&self, version: u64, reason: &str) {
        self.state
            .write()
            .await
            .migration_failures
            .insert(version, reason.to_string());
    }

    /// Clear all configured failures
    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.operation_failures.clear();
        state.migration_failures.clear();
    }

    /// Get a table by name
    pub async fn table(&self, name: &str) -> Option<CatalogTable> {
        self.state.read().await.tables.get(name).cloned()
    }

    /// Get all table names
    pub async fn table_names(&self) -> Vec<String> {
        self.state.read().await.tables.keys().cloned().collect()
    }

    /// Operations applied so far, in order
    pub async fn applied_operations(&self) -> Vec<SchemaOperation> {
        self.state.read().await.applied.clone()
    }

    /// Whether the target database exists
    pub async fn database_exists(&self) -> bool {
        self.state.read().await.database_exists
    }

    /// Session currently holding a lock key
    pub async fn lock_holder(&self, key: i64) -> Option<u64> {
        self.state.read().await.locks.get(&key).copied()
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    /// Fail as unreachable when configured to
    async fn reach(&self) -> Result<(), CatalogError> {
        self.simulate_latency().await;

        if self.fail_connection {
            return Err(CatalogError::Unavailable(
                "Simulated connection failure".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(CatalogError::Unavailable(
                "Simulated transient connection failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), CatalogError> {
        self.reach().await?;

        if !self.state.read().await.database_exists {
            return Err(CatalogError::DatabaseMissing(self.database.clone()));
        }
        Ok(())
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockCatalog {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            sessions: Arc::clone(&self.sessions),
            session_id: self.session_id,
            database: self.database.clone(),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}

fn rejected(operation: &SchemaOperation, reason: impl Into<String>) -> CatalogError {
    let statement = ddl::render_operation("public", operation)
        .into_iter()
        .next()
        .unwrap_or_default();
    CatalogError::Rejected {
        statement,
        reason: reason.into(),
    }
}

fn table_mut<'a>(
    state: &'a mut MockState,
    operation: &SchemaOperation,
) -> Result<&'a mut CatalogTable, CatalogError> {
    let name = operation.table().to_string();
    state
        .tables
        .get_mut(&name)
        .ok_or_else(|| rejected(operation, format!("relation \"{}\" does not exist", name)))
}

/// Apply one operation to the in-memory catalog
///
/// Every check runs before anything is mutated, so a rejected operation
/// leaves the catalog untouched.
fn apply_to_state(state: &mut MockState, operation: &SchemaOperation) -> Result<(), CatalogError> {
    if let Some(reason) = state.operation_failures.get(&operation.target()) {
        return Err(rejected(operation, reason.clone()));
    }

    let populated = state.rows.get(operation.table()).copied().unwrap_or(0) > 0;

    match operation {
        SchemaOperation::CreateTable { entity } => {
            if state.tables.contains_key(&entity.name) {
                return Err(rejected(
                    operation,
                    format!("relation \"{}\" already exists", entity.name),
                ));
            }
            state
                .tables
                .insert(entity.name.clone(), CatalogTable::from_entity(entity));
        }

        SchemaOperation::DropTable { table } => {
            let dependents: Vec<&str> = state
                .tables
                .values()
                .filter(|t| t.name != table.name && t.dependencies().contains(&table.name.as_str()))
                .map(|t| t.name.as_str())
                .collect();
            if !dependents.is_empty() {
                return Err(rejected(
                    operation,
                    format!(
                        "cannot drop table {} because other objects depend on it ({})",
                        table.name,
                        dependents.join(", ")
                    ),
                ));
            }
            if state.tables.remove(&table.name).is_none() {
                return Err(rejected(
                    operation,
                    format!("table \"{}\" does not exist", table.name),
                ));
            }
            state.rows.remove(&table.name);
        }

        SchemaOperation::AddColumn { table, field } => {
            let target = table_mut(state, operation)?;
            if target.find_column(&field.name).is_some() {
                return Err(rejected(
                    operation,
                    format!("column \"{}\" of relation \"{}\" already exists", field.name, table),
                ));
            }

            let column = CatalogColumn::from_field(table, field);
            if populated && !column.nullable && column.default.is_none() {
                return Err(rejected(
                    operation,
                    format!("column \"{}\" of relation \"{}\" contains null values", field.name, table),
                ));
            }

            if field.is_primary_key() {
                target.primary_key = vec![field.name.clone()];
            }
            target.columns.push(column);
        }

        SchemaOperation::DropColumn { table, column } => {
            let target = table_mut(state, operation)?;
            if target.find_column(&column.name).is_none() {
                return Err(rejected(
                    operation,
                    format!("column \"{}\" of relation \"{}\" does not exist", column.name, table),
                ));
            }

            target.columns.retain(|c| c.name != column.name);
            target.primary_key.retain(|c| c != &column.name);
            target.indexes.retain(|i| !i.fields.contains(&column.name));
            target
                .constraints
                .retain(|c| !c.columns().contains(&column.name));
        }

        SchemaOperation::AlterColumnType { table, column, from, to } => {
            let target = table_mut(state, operation)?;
            let Some(existing) = target.columns.iter_mut().find(|c| &c.name == column) else {
                return Err(rejected(
                    operation,
                    format!("column \"{}\" of relation \"{}\" does not exist", column, table),
                ));
            };

            if populated && from.nullable && !to.nullable && to.default.is_none() {
                return Err(rejected(
                    operation,
                    format!("column \"{}\" of relation \"{}\" contains null values", column, table),
                ));
            }
            if populated && !from.logical_type.widens_to(&to.logical_type) {
                return Err(rejected(
                    operation,
                    format!(
                        "existing values of \"{}\" cannot be converted from {} to {}",
                        column, from.logical_type, to.logical_type
                    ),
                ));
            }

            existing.logical_type = to.logical_type.clone();
            existing.physical_type = to.physical_type.clone();
            existing.nullable = to.nullable;
            existing.default = to.default.clone();
            existing.raw_default = to.default.as_ref().map(|d| d.to_sql());

            if to.logical_type == LogicalType::Id {
                target.primary_key = vec![column.clone()];
            } else if from.logical_type == LogicalType::Id {
                target.primary_key.clear();
            }
        }

        SchemaOperation::AddIndex { table, index } => {
            let name = index.name_for(table);
            let target = table_mut(state, operation)?;
            if target.indexes.iter().any(|i| i.name_for(table) == name) {
                return Err(rejected(operation, format!("relation \"{}\" already exists", name)));
            }
            if let Some(missing) = index.fields.iter().find(|f| target.find_column(f).is_none()) {
                return Err(rejected(
                    operation,
                    format!("column \"{}\" does not exist", missing),
                ));
            }
            target.indexes.push(index.clone().with_name(name));
        }

        SchemaOperation::DropIndex { table, index } => {
            let name = index.name_for(table);
            let target = table_mut(state, operation)?;
            let before = target.indexes.len();
            target.indexes.retain(|i| i.name_for(table) != name);
            if target.indexes.len() == before {
                return Err(rejected(operation, format!("index \"{}\" does not exist", name)));
            }
        }

        SchemaOperation::AddConstraint { table: _, constraint } => {
            if let Some(referenced) = constraint.referenced_table() {
                if !state.tables.contains_key(referenced) {
                    return Err(rejected(
                        operation,
                        format!("relation \"{}\" does not exist", referenced),
                    ));
                }
            }
            let target = table_mut(state, operation)?;
            if target.constraints.iter().any(|c| c.name == constraint.name) {
                return Err(rejected(
                    operation,
                    format!("constraint \"{}\" already exists", constraint.name),
                ));
            }
            target.constraints.push(constraint.clone());
        }

        SchemaOperation::DropConstraint { table: _, constraint } => {
            let target = table_mut(state, operation)?;
            let before = target.constraints.len();
            target.constraints.retain(|c| c.name != constraint.name);
            if target.constraints.len() == before {
                return Err(rejected(
                    operation,
                    format!("constraint \"{}\" does not exist", constraint.name),
                ));
            }
        }
    }

    state.applied.push(operation.clone());
    Ok(())
}

#[async_trait::async_trait]
impl CatalogAdapter for MockCatalog {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn test_connection(&self) -> Result<(), CatalogError> {
        self.check_connection().await
    }

    async fn ensure_database(&self) -> Result<bool, CatalogError> {
        self.reach().await?;

        let mut state = self.state.write().await;
        if state.database_exists {
            Ok(false)
        } else {
            state.database_exists = true;
            Ok(true)
        }
    }

    async fn inspect(&self) -> Result<Vec<CatalogTable>, CatalogError> {
        self.check_connection().await?;
        Ok(self.state.read().await.tables.values().cloned().collect())
    }

    async fn apply(&self, operation: &SchemaOperation) -> Result<(), CatalogError> {
        self.check_connection().await?;
        let mut state = self.state.write().await;
        apply_to_state(&mut state, operation)
    }

    fn render(&self, operation: &SchemaOperation) -> Vec<String> {
        ddl::render_operation("public", operation)
    }

    async fn try_lock(&self, key: i64) -> Result<bool, CatalogError> {
        self.check_connection().await?;

        let mut state = self.state.write().await;
        match state.locks.get(&key) {
            Some(holder) => Ok(*holder == self.session_id),
            None => {
                state.locks.insert(key, self.session_id);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: i64) -> Result<(), CatalogError> {
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        if state.locks.get(&key) == Some(&self.session_id) {
            state.locks.remove(&key);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationHistory for MockCatalog {
    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, CatalogError> {
        self.check_connection().await?;

        let mut history = self.state.read().await.history.clone();
        history.sort_by_key(|r| r.version);
        Ok(history)
    }

    async fn apply_migration(&self, migration: &LegacyMigration) -> Result<(), CatalogError> {
        self.check_connection().await?;

        let mut state = self.state.write().await;
        if let Some(reason) = state.migration_failures.get(&migration.version) {
            return Err(CatalogError::Rejected {
                statement: migration.label(),
                reason: reason.clone(),
            });
        }
        if state.history.iter().any(|r| r.version == migration.version) {
            return Err(CatalogError::Rejected {
                statement: migration.label(),
                reason: format!("migration {} already recorded", migration.version),
            });
        }

        state.history.push(migration.record());
        Ok(())
    }
}
