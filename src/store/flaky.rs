use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{InMemoryThresholdStore, PersistenceError, ThresholdStore};
use crate::domain::{ThresholdRecord, TrackingKey};

/// Fails every read and write on one key and delegates the rest.
pub(crate) struct FlakyStore {
    pub inner: InMemoryThresholdStore,
    pub broken: TrackingKey,
}

impl FlakyStore {
    pub fn new(broken: TrackingKey) -> Self {
        Self {
            inner: InMemoryThresholdStore::new(),
            broken,
        }
    }

    fn check(&self, key: &TrackingKey) -> Result<(), PersistenceError> {
        if *key == self.broken {
            return Err(PersistenceError::OperationFailed("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ThresholdStore for FlakyStore {
    async fn get(&self, key: &TrackingKey) -> Result<Option<ThresholdRecord>, PersistenceError> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn upsert_quantity(
        &self,
        key: &TrackingKey,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.check(key)?;
        self.inner.upsert_quantity(key, quantity, now).await
    }

    async fn prune_stale(&self, window_start: DateTime<Utc>) -> Result<usize, PersistenceError> {
        self.inner.prune_stale(window_start).await
    }

    async fn prune_absent(
        &self,
        present: &HashSet<TrackingKey>,
    ) -> Result<usize, PersistenceError> {
        self.inner.prune_absent(present).await
    }
}
