//! Background worker pool driving the rule engine and reward executor
//!
//! Each worker loops: dequeue, evaluate, apply, re-enqueue cascades, mark
//! processed. Transient failures requeue with exponential backoff up to the
//! retry budget; terminal failures record a failed history row and drop the
//! event. Every dequeued event leaves at least one history row behind.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::RuleEngine;
use crate::error::EngineError;
use crate::executor::RewardExecutor;
use crate::models::{GameEvent, HistoryRewardType, RewardHistoryEntry};
use crate::queue::{IngestQueue, QueueItem};
use crate::storage::{EventStore, RewardHistoryStore};

const RETRY_BASE: Duration = Duration::from_millis(100);

/// Handle over the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

struct WorkerContext {
    queue: Arc<IngestQueue>,
    engine: Arc<RuleEngine>,
    executor: Arc<RewardExecutor>,
    events: Arc<dyn EventStore>,
    history: Arc<dyn RewardHistoryStore>,
    config: EngineConfig,
}

impl WorkerPool {
    /// Spawn `max_concurrent_processing` workers.
    pub fn spawn(
        config: EngineConfig,
        queue: Arc<IngestQueue>,
        engine: Arc<RuleEngine>,
        executor: Arc<RewardExecutor>,
        events: Arc<dyn EventStore>,
        history: Arc<dyn RewardHistoryStore>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let context = Arc::new(WorkerContext {
            queue,
            engine,
            executor,
            events,
            history,
            config: config.clone(),
        });

        let handles = (0..config.max_concurrent_processing.max(1))
            .map(|worker_id| {
                let context = context.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    worker_loop(worker_id, context, &mut shutdown_rx).await;
                })
            })
            .collect();

        Self { handles, shutdown }
    }

    /// Signal workers to stop dequeuing and wait for in-flight events to
    /// drain, up to the grace period.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let drain = futures_join_all(self.handles);
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("worker pool did not drain within the grace period");
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn worker_loop(
    worker_id: usize,
    context: Arc<WorkerContext>,
    shutdown: &mut watch::Receiver<bool>,
) {
    info!(worker_id, "worker started");
    loop {
        let item = tokio::select! {
            _ = shutdown.changed() => break,
            dequeued = tokio::time::timeout(
                context.config.processing_interval,
                context.queue.dequeue(),
            ) => match dequeued {
                // Poll tick: re-check the shutdown signal.
                Err(_) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(item)) => item,
            },
        };

        handle_item(worker_id, &context, item).await;
    }
    info!(worker_id, "worker stopped");
}

async fn handle_item(worker_id: usize, context: &WorkerContext, mut item: QueueItem) {
    let event_id = item.event.event_id.clone();
    let user_id = item.event.user_id.clone();
    debug!(worker_id, %event_id, %user_id, attempts = item.attempts, "processing event");

    match process_event(context, &item.event).await {
        Ok(()) => {
            context.queue.complete(&user_id);
        }
        Err(err) if err.is_transient()
            && context.config.enable_retry_on_failure
            && item.attempts < context.config.max_retry_attempts =>
        {
            let backoff = RETRY_BASE * 2u32.saturating_pow(item.attempts);
            warn!(
                worker_id, %event_id, %err, attempts = item.attempts,
                backoff_ms = backoff.as_millis() as u64,
                "transient failure, requeueing"
            );
            tokio::time::sleep(backoff).await;
            item.attempts += 1;
            context.queue.requeue(item);
        }
        Err(err) => {
            error!(worker_id, %event_id, %err, "terminal failure, dropping event");
            record_failure(context, &item.event, &err).await;
            // Best effort: without the marker the event would be replayed on
            // the next rehydration.
            if let Err(mark_err) = context.events.mark_processed(&event_id).await {
                error!(%event_id, %mark_err, "failed to mark dropped event processed");
            }
            context.queue.complete(&user_id);
        }
    }
}

async fn process_event(context: &WorkerContext, event: &GameEvent) -> crate::error::Result<()> {
    let evaluation = context.engine.evaluate(event).await?;
    let outcome = context.executor.apply(event, &evaluation.plan).await?;

    for cascade in outcome.cascades {
        context.events.append(&cascade).await?;
        match context.queue.enqueue(cascade.clone()) {
            Ok(()) => {}
            Err(EngineError::QueueFull) | Err(EngineError::QueueClosed) => {
                // The event row is durable; rehydration picks it up later.
                warn!(
                    cascade_id = %cascade.event_id,
                    event_type = %cascade.event_type,
                    "could not enqueue cascade event, leaving it for rehydration"
                );
            }
            Err(err) => return Err(err),
        }
    }

    context.events.mark_processed(&event.event_id).await?;
    Ok(())
}

/// Terminal failures still leave a history row: no silent drops.
async fn record_failure(context: &WorkerContext, event: &GameEvent, err: &EngineError) {
    let entry = RewardHistoryEntry::new(
        &event.user_id,
        HistoryRewardType::NoMatch,
        "processing_failed",
        &event.event_id,
        false,
    )
    .with_message(err.to_string())
    .with_detail("detail", json!("processing_failed"));
    if let Err(append_err) = context.history.append(entry).await {
        error!(event_id = %event.event_id, %append_err, "failed to record terminal failure");
    }
}
