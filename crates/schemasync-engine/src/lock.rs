//! Reconciliation lock
//!
//! An advisory lock on the target database serializes reconciliation and
//! the legacy bridge across application instances.

use crate::error::ReconcileError;
use schemasync_catalog::{lock_key, CatalogAdapter, RECONCILE_LOCK_SCOPE};
use std::time::Duration;

/// A held reconciliation lock
///
/// Must be released with [`ReconcileLock::release`]; the underlying
/// primitive is async, so there is no release on drop.
#[must_use = "the lock stays held until released"]
pub struct ReconcileLock<'a> {
    adapter: &'a dyn CatalogAdapter,
    key: i64,
}

impl<'a> ReconcileLock<'a> {
    /// Take the lock, polling until `timeout` elapses
    pub async fn acquire(
        adapter: &'a dyn CatalogAdapter,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, ReconcileError> {
        let key = lock_key(RECONCILE_LOCK_SCOPE);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if adapter.try_lock(key).await? {
                tracing::debug!(key, attempts, "reconciliation lock acquired");
                return Ok(Self { adapter, key });
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(attempts, "reconciliation lock is held by another instance");
                return Err(ReconcileError::LockTimeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Release the lock
    ///
    /// A failed release is logged; the database drops session locks when the
    /// session ends.
    pub async fn release(self) {
        match self.adapter.unlock(self.key).await {
            Ok(()) => tracing::debug!(key = self.key, "reconciliation lock released"),
            Err(e) => tracing::error!(key = self.key, error = %e, "failed to release reconciliation lock"),
        }
    }
}
