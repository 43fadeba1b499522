pub mod config;
pub mod dedup;
pub mod domain;
pub mod gateway;
pub mod notifier;
pub mod store;
pub mod tracker;
pub mod utils;
pub mod window;

use std::sync::Arc;

use config::AppConfig;
use gateway::GatewayClient;
use notifier::{ChatProNotifier, ConsoleNotifier, NotifierHub};
use store::{InMemoryThresholdStore, SqliteThresholdStore};
use tracker::FenceTracker;
use utils::mask_url;

use anyhow::Result;
use tracing::info;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    info!("🔌 Query gateway: {}", mask_url(&config.gateway.base_url));
    let fetcher = Arc::new(GatewayClient::new(config.gateway.clone()));

    let notifier = NotifierHub::new(
        ConsoleNotifier::new(),
        ChatProNotifier::maybe_from_config(&config),
    );
    if notifier.has_remote_channel() {
        info!("📱 ChatPro notifications enabled");
    } else {
        info!("📱 ChatPro notifications disabled (no credentials)");
    }
    let notifier = Arc::new(notifier);

    if config.uses_in_process_store() {
        info!("🗄️  Threshold records kept in memory, they reset on restart");
        let store = Arc::new(InMemoryThresholdStore::new());
        return FenceTracker::new(&config, store, fetcher, notifier).run().await;
    }

    let store = Arc::new(SqliteThresholdStore::new(&config.database_url).await?);
    store.run_migrations().await?;

    let tracker = FenceTracker::new(&config, store.clone(), fetcher, notifier);
    let outcome = tracker.run().await;
    store.close().await;
    outcome
}
