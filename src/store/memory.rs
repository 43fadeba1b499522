use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PersistenceError, ThresholdStore};
use crate::domain::{ThresholdRecord, TrackingKey};

/// Process-local store. State is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryThresholdStore {
    records: RwLock<HashMap<TrackingKey, ThresholdRecord>>,
}

impl InMemoryThresholdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn records(&self) -> Vec<ThresholdRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}

#[async_trait]
impl ThresholdStore for InMemoryThresholdStore {
    async fn get(&self, key: &TrackingKey) -> Result<Option<ThresholdRecord>, PersistenceError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn upsert_quantity(
        &self,
        key: &TrackingKey,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        records
            .entry(key.clone())
            .and_modify(|record| {
                record.quantity = record.quantity.max(quantity);
                record.updated_at = now;
            })
            .or_insert_with(|| ThresholdRecord {
                key: key.clone(),
                quantity,
                updated_at: now,
            });
        Ok(())
    }

    async fn prune_stale(&self, window_start: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.updated_at >= window_start);
        Ok(before - records.len())
    }

    async fn prune_absent(
        &self,
        present: &HashSet<TrackingKey>,
    ) -> Result<usize, PersistenceError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|key, _| present.contains(key));
        Ok(before - records.len())
    }
}
