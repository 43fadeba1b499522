//! Persisted mapping from tracking key to the last notified threshold multiple.

mod error;
#[cfg(test)]
mod flaky;
mod memory;
mod sqlite;

pub use error::PersistenceError;
#[cfg(test)]
pub(crate) use flaky::FlakyStore;
pub use memory::InMemoryThresholdStore;
pub use sqlite::SqliteThresholdStore;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{ThresholdRecord, TrackingKey};

/// No cross-key transactions: every call touches one key or is a bulk prune.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ThresholdStore: Send + Sync {
    async fn get(&self, key: &TrackingKey) -> Result<Option<ThresholdRecord>, PersistenceError>;

    /// Creates the record or overwrites its quantity, stamping `updated_at = now`.
    /// A stored quantity is never lowered.
    async fn upsert_quantity(
        &self,
        key: &TrackingKey,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn prune_stale(&self, window_start: DateTime<Utc>) -> Result<usize, PersistenceError>;

    async fn prune_absent(&self, present: &HashSet<TrackingKey>)
        -> Result<usize, PersistenceError>;
}
