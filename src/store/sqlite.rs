use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{PersistenceError, ThresholdStore};
use crate::domain::{ThresholdRecord, TrackingKey};

pub struct SqliteThresholdStore {
    pool: SqlitePool,
}

impl SqliteThresholdStore {
    /// Connects to `database_url`, creating the database file if needed.
    #[tracing::instrument(level = "info")]
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| PersistenceError::InvalidInput(e.to_string()))?
            .create_if_missing(true);

        // Every connection to an in-memory database opens a separate, empty
        // database, so those must stay on one long-lived connection.
        let pool_options = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            PersistenceError::OperationFailed(format!("failed to connect to database: {e}"))
        })?;
        tracing::info!(database_url, "Connected to threshold database.");
        Ok(Self { pool })
    }

    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run threshold store migrations.");
            PersistenceError::MigrationError(e.to_string())
        })?;
        tracing::info!("Threshold store migrations applied.");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Threshold database pool closed.");
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn operation_failed(operation: &'static str) -> impl FnOnce(sqlx::Error) -> PersistenceError {
    move |e| {
        tracing::error!(error = %e, operation, "Threshold store operation failed.");
        PersistenceError::OperationFailed(format!("{operation}: {e}"))
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ThresholdRecord, PersistenceError> {
    let key: String = row.try_get("key").map_err(operation_failed("decode key"))?;
    let quantity: i64 = row.try_get("quantity").map_err(operation_failed("decode quantity"))?;
    let updated_at: i64 =
        row.try_get("updated_at").map_err(operation_failed("decode updated_at"))?;

    let quantity = u64::try_from(quantity).map_err(|_| PersistenceError::CorruptRecord {
        key: key.clone(),
        reason: format!("negative quantity {quantity}"),
    })?;
    let updated_at = DateTime::<Utc>::from_timestamp_millis(updated_at).ok_or_else(|| {
        PersistenceError::CorruptRecord {
            key: key.clone(),
            reason: format!("timestamp {updated_at} out of range"),
        }
    })?;

    Ok(ThresholdRecord {
        key: TrackingKey::from(key),
        quantity,
        updated_at,
    })
}

#[async_trait]
impl ThresholdStore for SqliteThresholdStore {
    #[tracing::instrument(skip(self, key), fields(key = %key), level = "debug")]
    async fn get(&self, key: &TrackingKey) -> Result<Option<ThresholdRecord>, PersistenceError> {
        let row = sqlx::query("SELECT key, quantity, updated_at FROM fence_thresholds WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(operation_failed("get threshold"))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[tracing::instrument(skip(self, key), fields(key = %key), level = "debug")]
    async fn upsert_quantity(
        &self,
        key: &TrackingKey,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let quantity = i64::try_from(quantity).map_err(|_| {
            PersistenceError::InvalidInput(format!("quantity {quantity} exceeds storage range"))
        })?;

        sqlx::query(
            "INSERT INTO fence_thresholds (key, quantity, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET \
                 quantity = MAX(fence_thresholds.quantity, excluded.quantity), \
                 updated_at = excluded.updated_at",
        )
        .bind(key.as_str())
        .bind(quantity)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(operation_failed("upsert threshold"))?;

        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn prune_stale(&self, window_start: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let result = sqlx::query("DELETE FROM fence_thresholds WHERE updated_at < ?")
            .bind(window_start.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(operation_failed("prune stale thresholds"))?;

        Ok(result.rows_affected() as usize)
    }

    #[tracing::instrument(skip(self, present), fields(present = present.len()), level = "debug")]
    async fn prune_absent(
        &self,
        present: &HashSet<TrackingKey>,
    ) -> Result<usize, PersistenceError> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM fence_thresholds");
        if !present.is_empty() {
            builder.push(" WHERE key NOT IN (");
            let mut keys = builder.separated(", ");
            for key in present {
                keys.push_bind(key.as_str());
            }
            keys.push_unseparated(")");
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(operation_failed("prune absent thresholds"))?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn setup_store() -> SqliteThresholdStore {
        let store = SqliteThresholdStore::new("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database");
        store.run_migrations().await.expect("Failed to run migrations");
        store
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = setup_store().await;
        assert!(store.get(&TrackingKey::new("A1", "Z1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_round_trips_record() {
        let store = setup_store().await;
        let key = TrackingKey::new("A1", "Z1");

        store.upsert_quantity(&key, 50, noon()).await.unwrap();

        let record = store.get(&key).await.unwrap().expect("record exists");
        assert_eq!(record.key, key);
        assert_eq!(record.quantity, 50);
        assert_eq!(record.updated_at, noon());
    }

    #[tokio::test]
    async fn upsert_updates_quantity_and_timestamp() {
        let store = setup_store().await;
        let key = TrackingKey::new("A1", "Z1");
        let later = noon() + Duration::minutes(3);

        store.upsert_quantity(&key, 50, noon()).await.unwrap();
        store.upsert_quantity(&key, 100, later).await.unwrap();

        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.quantity, 100);
        assert_eq!(record.updated_at, later);
    }

    #[tokio::test]
    async fn upsert_keeps_the_higher_quantity() {
        let store = setup_store().await;
        let key = TrackingKey::new("A1", "Z1");

        store.upsert_quantity(&key, 200, noon()).await.unwrap();
        store.upsert_quantity(&key, 100, noon()).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap().unwrap().quantity, 200);
    }

    #[tokio::test]
    async fn prune_stale_uses_strict_comparison() {
        let store = setup_store().await;
        let before = TrackingKey::new("A1", "Z1");
        let at_start = TrackingKey::new("A2", "Z1");

        store
            .upsert_quantity(&before, 300, noon() - Duration::milliseconds(1))
            .await
            .unwrap();
        store.upsert_quantity(&at_start, 50, noon()).await.unwrap();

        assert_eq!(store.prune_stale(noon()).await.unwrap(), 1);
        assert!(store.get(&before).await.unwrap().is_none());
        assert!(store.get(&at_start).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn prune_absent_deletes_missing_keys() {
        let store = setup_store().await;
        for account in ["A1", "A2", "A3"] {
            store.upsert_quantity(&TrackingKey::new(account, "Z1"), 50, noon()).await.unwrap();
        }

        let present: HashSet<_> =
            [TrackingKey::new("A1", "Z1"), TrackingKey::new("A3", "Z1"), TrackingKey::new("A9", "Z9")]
                .into_iter()
                .collect();
        assert_eq!(store.prune_absent(&present).await.unwrap(), 1);

        assert!(store.get(&TrackingKey::new("A2", "Z1")).await.unwrap().is_none());
        assert!(store.get(&TrackingKey::new("A3", "Z1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn prune_absent_with_no_keys_clears_table() {
        let store = setup_store().await;
        store.upsert_quantity(&TrackingKey::new("A1", "Z1"), 50, noon()).await.unwrap();

        assert_eq!(store.prune_absent(&HashSet::new()).await.unwrap(), 1);
        assert!(store.get(&TrackingKey::new("A1", "Z1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_upserts_on_distinct_keys() {
        let store = setup_store().await;
        let keys: Vec<_> = (0..20).map(|i| TrackingKey::new(&format!("A{i}"), "Z1")).collect();

        futures::future::join_all(keys.iter().map(|key| store.upsert_quantity(key, 50, noon())))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for key in &keys {
            assert_eq!(store.get(key).await.unwrap().unwrap().quantity, 50);
        }
    }

    #[test]
    fn detects_in_memory_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:thresholds?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://fence_thresholds.db"));
    }
}
