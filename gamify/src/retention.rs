//! Retention sweeper: deletes events past the configured horizon
//!
//! A leaf job with no coupling to in-flight evaluation; reward history is
//! never touched.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::EventStore;

/// Periodic deleter of expired events.
pub struct RetentionSweeper {
    events: Arc<dyn EventStore>,
    config: EngineConfig,
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

impl RetentionSweeper {
    pub fn new(events: Arc<dyn EventStore>, config: EngineConfig) -> Self {
        Self { events, config }
    }

    /// One pass: delete everything older than the horizon, batch by batch.
    /// Returns the number of events removed.
    pub async fn sweep_once(&self) -> Result<usize> {
        let horizon = Utc::now() - ChronoDuration::days(self.config.retention_days);
        let mut total = 0;
        loop {
            let deleted = self
                .events
                .delete_older_than(horizon, self.config.retention_batch_size)
                .await?;
            total += deleted;
            if deleted < self.config.retention_batch_size {
                break;
            }
        }
        if total > 0 {
            info!(total, horizon = %horizon.to_rfc3339(), "retention sweep removed events");
        } else {
            debug!(horizon = %horizon.to_rfc3339(), "retention sweep found nothing to remove");
        }
        Ok(total)
    }

    /// Run sweeps on the configured interval until stopped.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = self.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of `interval` fires immediately; skip it so a
            // freshly started engine does not sweep at boot.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            error!(%err, "retention sweep failed");
                        }
                    }
                }
            }
        });
        SweeperHandle { shutdown, handle }
    }
}
