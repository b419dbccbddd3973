//! Catalog adapters for declarative schema reconciliation
//!
//! This crate provides the adapter seam the reconciler talks to: live catalog
//! introspection, single-operation application, DDL rendering, and the
//! advisory lock that serializes concurrent instances.
//!
//! ## Features
//!
//! - `postgres` - PostgreSQL adapter over tokio-postgres (plain or TLS)
//!
//! The in-memory [`MockCatalog`] is always available.
//!
//! ## Example
//!
//! ```rust,ignore
//! use schemasync_catalog::{CatalogAdapter, PostgresCatalog};
//!
//! let catalog = PostgresCatalog::new("postgres://app@localhost/shop")?;
//! catalog.ensure_database().await?;
//! let tables = catalog.inspect().await?;
//! ```

pub mod adapter;
pub mod ddl;
pub mod mock;
pub mod postgres;

pub use adapter::{lock_key, CatalogAdapter, CatalogError, MigrationHistory, RECONCILE_LOCK_SCOPE};
pub use mock::MockCatalog;
pub use postgres::{map_postgres_type, parse_default};

#[cfg(feature = "postgres")]
pub use postgres::PostgresCatalog;
