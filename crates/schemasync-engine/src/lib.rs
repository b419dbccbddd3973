//! SchemaSync engine - declarative schema reconciliation
//!
//! This crate turns a registry snapshot and a live catalog into applied DDL:
//! - Schema differ (ordered, deterministic operation lists)
//! - Safety classifier (additive vs. destructive)
//! - Reconciliation executor with an advisory lock
//! - Verifier for CI drift gates
//! - Legacy migration bridge
//! - Startup hook

pub mod classifier;
pub mod differ;
pub mod error;
pub mod executor;
pub mod legacy;
pub mod lock;
pub mod startup;
pub mod verifier;

pub use classifier::{assess, classify, classify_all};
pub use differ::diff;
pub use error::ReconcileError;
pub use executor::{ReconcileOptions, Reconciler};
pub use legacy::{BridgeReport, LegacyBridge};
pub use lock::ReconcileLock;
pub use startup::{run_on_startup, StartupOutcome};
pub use verifier::{Verification, Verifier};
