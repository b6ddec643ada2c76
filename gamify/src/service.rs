//! Engine facade: wires the queue, rule engine, executor, workers, sweeper,
//! and dry-run behind one handle
//!
//! This is the surface the API server talks to. Ingest is asynchronous by
//! contract: the ack means the event is durable and admitted, not executed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::{CatalogBuilder, CatalogService};
use crate::config::EngineConfig;
use crate::dryrun::{DryRunResponse, DryRunService};
use crate::engine::RuleEngine;
use crate::error::{EngineError, Result};
use crate::executor::RewardExecutor;
use crate::models::{
    EventDocument, HistoryRewardType, RewardHistoryEntry, UserState, Wallet, WalletTransaction,
    WalletTransactionType, WalletTransfer,
};
use crate::projection::ProjectionRebuilder;
use crate::queue::IngestQueue;
use crate::retention::{RetentionSweeper, SweeperHandle};
use crate::storage::{
    EventStore, InMemoryEventStore, InMemoryRewardHistoryStore, InMemoryUserStateStore,
    InMemoryWalletStore, RewardHistoryStore, UserStateStore, WalletStore,
};
use crate::worker::WorkerPool;

/// Reference id recorded on wallet operations invoked directly through the
/// API rather than by a rule.
const DIRECT_REFERENCE: &str = "direct";

/// Ingest acknowledgement: receipt, not execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAck {
    pub event_id: String,
    pub status: String,
}

/// The assembled engine.
pub struct GamificationEngine {
    config: EngineConfig,
    catalog: Arc<CatalogService>,
    events: Arc<dyn EventStore>,
    wallets: Arc<dyn WalletStore>,
    history: Arc<dyn RewardHistoryStore>,
    user_state: Arc<dyn UserStateStore>,
    queue: Arc<IngestQueue>,
    engine: Arc<RuleEngine>,
    executor: Arc<RewardExecutor>,
    rebuilder: ProjectionRebuilder,
    dryrun: DryRunService,
    workers: Mutex<Option<WorkerPool>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl GamificationEngine {
    /// Engine over the in-memory reference stores.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryWalletStore::new()),
            Arc::new(InMemoryRewardHistoryStore::new()),
            Arc::new(InMemoryUserStateStore::new()),
        )
    }

    /// Engine over caller-provided stores.
    pub fn with_stores(
        config: EngineConfig,
        events: Arc<dyn EventStore>,
        wallets: Arc<dyn WalletStore>,
        history: Arc<dyn RewardHistoryStore>,
        user_state: Arc<dyn UserStateStore>,
    ) -> Self {
        let catalog = Arc::new(CatalogService::empty());
        let queue = Arc::new(IngestQueue::new(config.max_queue_size));
        let engine = Arc::new(RuleEngine::new(
            catalog.clone(),
            events.clone(),
            config.max_eval_ms,
        ));
        let executor = Arc::new(RewardExecutor::new(
            catalog.clone(),
            wallets.clone(),
            history.clone(),
            user_state.clone(),
            config.max_cascade_depth,
        ));
        let rebuilder = ProjectionRebuilder::new(
            catalog.clone(),
            wallets.clone(),
            history.clone(),
            user_state.clone(),
        );
        let dryrun = DryRunService::new(catalog.clone(), engine.clone());

        Self {
            config,
            catalog,
            events,
            wallets,
            history,
            user_state,
            queue,
            engine,
            executor,
            rebuilder,
            dryrun,
            workers: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Validate and swap in a new catalog.
    pub fn install_catalog(&self, builder: CatalogBuilder) -> Result<()> {
        self.catalog.install(builder)
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    /// Rehydrate the queue from the store and start workers plus the
    /// retention sweeper.
    pub async fn start(&self) -> Result<()> {
        let rehydrated = self.queue.rehydrate(self.events.as_ref()).await?;
        if rehydrated > 0 {
            info!(rehydrated, "rehydrated unprocessed events into the queue");
        }

        let pool = WorkerPool::spawn(
            self.config.clone(),
            self.queue.clone(),
            self.engine.clone(),
            self.executor.clone(),
            self.events.clone(),
            self.history.clone(),
        );
        *self.workers.lock().await = Some(pool);

        let sweeper = RetentionSweeper::new(self.events.clone(), self.config.clone()).spawn();
        *self.sweeper.lock().await = Some(sweeper);

        info!(
            workers = self.config.max_concurrent_processing,
            queue_capacity = self.config.max_queue_size,
            "gamification engine started"
        );
        Ok(())
    }

    /// Close admission, stop the sweeper, and drain workers up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.queue.close();
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
        if let Some(pool) = self.workers.lock().await.take() {
            pool.shutdown(grace).await;
        }
        info!("gamification engine stopped");
    }

    /// Validate, persist, and admit an event for processing.
    pub async fn ingest(&self, document: EventDocument) -> Result<IngestAck> {
        // Fast-fail before writing anything durable.
        if self.queue.is_closed() {
            return Err(EngineError::QueueClosed);
        }
        if self.queue.len() >= self.config.max_queue_size {
            return Err(EngineError::QueueFull);
        }

        let event = document
            .into_event(Utc::now())
            .map_err(EngineError::Validation)?;

        let snapshot = self.catalog.snapshot();
        if let Some(definition) = snapshot.event_definition(&event.event_type) {
            let violations = definition.validate_payload(&event);
            if !violations.is_empty() {
                return Err(EngineError::Validation(violations));
            }
        }

        // Durability ordering: the row lands before admission.
        self.events.append(&event).await?;
        match self.queue.enqueue(event.clone()) {
            Ok(()) => {}
            Err(EngineError::QueueFull) | Err(EngineError::QueueClosed) => {
                // The row is durable; the next rehydration will pick it up.
                warn!(
                    event_id = %event.event_id,
                    "event persisted but not admitted, deferring to rehydration"
                );
            }
            Err(err) => return Err(err),
        }

        Ok(IngestAck {
            event_id: event.event_id,
            status: "accepted".to_string(),
        })
    }

    /// Trace what an event would do, without side effects.
    pub async fn dry_run(&self, document: EventDocument) -> Result<DryRunResponse> {
        self.dryrun.dry_run(document).await
    }

    /// Current projection for a user; an unknown user reads as empty.
    pub async fn user_state(&self, user_id: &str) -> Result<UserState> {
        Ok(self
            .user_state
            .get(user_id)
            .await?
            .unwrap_or_else(|| UserState::new(user_id)))
    }

    pub async fn wallet(&self, user_id: &str, category: &str) -> Result<Wallet> {
        Ok(self.wallets.wallet(user_id, category).await?)
    }

    pub async fn wallets(&self, user_id: &str) -> Result<Vec<Wallet>> {
        Ok(self.wallets.wallets_for_user(user_id).await?)
    }

    pub async fn reward_history(&self, user_id: &str) -> Result<Vec<RewardHistoryEntry>> {
        Ok(self.history.for_user(user_id).await?)
    }

    /// Direct spend against a user's wallet, outside any rule.
    pub async fn spend(&self, user_id: &str, category: &str, amount: i64) -> Result<Wallet> {
        if amount <= 0 {
            return Err(EngineError::Validation(vec![
                "spend amount must be positive".to_string(),
            ]));
        }
        let snapshot = self.catalog.snapshot();
        let category_def = snapshot
            .point_category(category)
            .ok_or_else(|| EngineError::CatalogMissing(format!("point category '{}'", category)))?;
        if !category_def.allow_spend {
            return Err(EngineError::Validation(vec![format!(
                "category '{}' does not allow spending",
                category
            )]));
        }

        let transaction = WalletTransaction::new(
            user_id,
            category,
            -amount,
            WalletTransactionType::Debit,
            Some(DIRECT_REFERENCE.to_string()),
        );
        let balance = self
            .wallets
            .apply_transaction(transaction, category_def.allow_negative)
            .await?;

        let entry = RewardHistoryEntry::new(
            user_id,
            HistoryRewardType::Transaction,
            "api_spend",
            DIRECT_REFERENCE,
            true,
        )
        .with_points(-amount, category)
        .with_detail("detail", json!("debited"))
        .with_detail("balance", json!(balance));
        self.history.append(entry).await?;
        self.rebuilder.repair(user_id).await?;

        Ok(self.wallets.wallet(user_id, category).await?)
    }

    /// Direct peer transfer, outside any rule. The returned record carries
    /// `completed` or `failed`.
    pub async fn transfer(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        category: &str,
        amount: i64,
    ) -> Result<WalletTransfer> {
        let snapshot = self.catalog.snapshot();
        let category_def = snapshot
            .point_category(category)
            .ok_or_else(|| EngineError::CatalogMissing(format!("point category '{}'", category)))?;
        if !category_def.allow_spend {
            return Err(EngineError::Validation(vec![format!(
                "category '{}' does not allow spending",
                category
            )]));
        }

        let transfer = self
            .wallets
            .apply_transfer(from_user_id, to_user_id, category, amount)
            .await?;

        let completed = transfer.status == crate::models::TransferStatus::Completed;
        let mut entry = RewardHistoryEntry::new(
            from_user_id,
            HistoryRewardType::Transfer,
            "api_transfer",
            DIRECT_REFERENCE,
            completed,
        )
        .with_points(-amount, category)
        .with_detail(
            "detail",
            json!(if completed { "transfer_completed" } else { "transfer_failed" }),
        )
        .with_detail("transferId", json!(transfer.id.to_string()))
        .with_detail("destination", json!(to_user_id));
        if let Some(reason) = &transfer.failure_reason {
            entry = entry.with_message(reason.clone());
        }
        self.history.append(entry).await?;

        if completed {
            self.rebuilder.repair(from_user_id).await?;
            self.rebuilder.repair(to_user_id).await?;
        }
        Ok(transfer)
    }

    /// Integrity check: does the stored projection match a rebuild?
    pub async fn verify_user_state(&self, user_id: &str) -> Result<bool> {
        self.rebuilder.verify(user_id).await
    }

    /// Rebuild and persist a user's projection from the ledger and history.
    pub async fn rebuild_user_state(&self, user_id: &str) -> Result<UserState> {
        self.rebuilder.repair(user_id).await
    }

    /// Queued plus in-flight work; zero means idle. Exposed for tests and
    /// operational probes.
    pub fn outstanding(&self) -> usize {
        self.queue.outstanding()
    }

    /// One manual retention pass.
    pub async fn sweep_retention(&self) -> Result<usize> {
        RetentionSweeper::new(self.events.clone(), self.config.clone())
            .sweep_once()
            .await
    }
}
