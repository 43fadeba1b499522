use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::dedup::DedupEngine;
use crate::domain::Snapshot;
use crate::gateway::{FetchError, SnapshotFetcher};
use crate::notifier::{render_messages, Notifier, NotifyMode};
use crate::store::{PersistenceError, ThresholdStore};
use crate::window::{ReportingWindow, WindowPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionMode {
    /// Drop records written before the current reporting window, before fetching.
    #[default]
    Window,
    /// Drop records whose key is missing from the latest snapshot list.
    Absent,
}

impl FromStr for RetentionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "window" => Ok(Self::Window),
            "absent" => Ok(Self::Absent),
            other => Err(format!("unknown retention mode: {other}")),
        }
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window => write!(f, "window"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("snapshot fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("pruning stale thresholds failed: {0}")]
    Prune(#[source] PersistenceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub window: ReportingWindow,
    pub pruned: usize,
    pub fetched: usize,
    pub flagged: usize,
    pub store_failures: usize,
    pub messages_sent: usize,
    pub notify_failures: usize,
}

pub struct FenceTracker {
    engine: DedupEngine,
    window: WindowPolicy,
    retention: RetentionMode,
    notify_mode: NotifyMode,
    poll_interval: Duration,
    store: Arc<dyn ThresholdStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    notifier: Arc<dyn Notifier>,
}

impl FenceTracker {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn ThresholdStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine: DedupEngine::new(config.threshold),
            window: config.window,
            retention: config.retention,
            notify_mode: config.notify_mode,
            poll_interval: config.poll_interval,
            store,
            fetcher,
            notifier,
        }
    }

    pub async fn run_once(&self) -> Result<RunReport, RunError> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let window = self.window.current_window(now);

        let mut pruned = 0;
        if self.retention == RetentionMode::Window {
            pruned = self
                .store
                .prune_stale(window.start)
                .await
                .map_err(RunError::Prune)?;
        }

        let snapshots = self.fetcher.fetch().await?;
        let outcome = self.engine.evaluate(self.store.as_ref(), &snapshots, now).await;

        if self.retention == RetentionMode::Absent {
            // Failed keys stay in the set so a transient error never wipes their record.
            let present: HashSet<_> = snapshots.iter().map(Snapshot::key).collect();
            match self.store.prune_absent(&present).await {
                Ok(removed) => pruned = removed,
                Err(e) => warn!("⚠️  Could not prune absent keys: {}", e),
            }
        }

        let messages = render_messages(&outcome.crossings, &window, self.notify_mode);
        // One at a time so the channel shows crossings in input order.
        let results: Vec<_> = stream::iter(&messages)
            .then(|message| self.notifier.send(message))
            .collect()
            .await;
        let mut messages_sent = 0;
        let mut notify_failures = 0;
        for result in results {
            match result {
                Ok(()) => messages_sent += 1,
                Err(e) => {
                    notify_failures += 1;
                    warn!("⚠️  Notification failed, crossing stays recorded: {}", e);
                }
            }
        }

        Ok(RunReport {
            window,
            pruned,
            fetched: snapshots.len(),
            flagged: outcome.crossings.len(),
            store_failures: outcome.failures.len(),
            messages_sent,
            notify_failures,
        })
    }

    /// Runs immediately, then on every poll interval until Ctrl-C. A failed run is
    /// logged and the next tick still happens.
    pub async fn run(&self) -> Result<()> {
        info!(
            "👁️  Tracking fence counts every {}s (step {}, retention {}, notify {})",
            self.poll_interval.as_secs(),
            self.engine.policy().step(),
            self.retention,
            self.notify_mode
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut current_window: Option<DateTime<Utc>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested, stopping tracker");
                    return Ok(());
                }
            }

            match self.run_once().await {
                Ok(report) => {
                    if current_window != Some(report.window.start) {
                        info!("🕛 Reporting window {} is active", report.window.label());
                        current_window = Some(report.window.start);
                    }
                    info!(
                        "✅ Run complete: fetched {}, flagged {}, pruned {}, store failures {}, sent {}, notify failures {}",
                        report.fetched,
                        report.flagged,
                        report.pruned,
                        report.store_failures,
                        report.messages_sent,
                        report.notify_failures
                    );
                }
                Err(e) => error!("❌ Run failed: {}", e),
            }
        }
    }
}
