//! Reward executor: materializes a plan against wallets, user state, and
//! reward history
//!
//! Applies steps in plan order. A reward that fails for business reasons
//! (insufficient balance, dangling catalog reference) records a failed
//! history row and the plan continues; a storage failure aborts the rest of
//! the plan, recording `plan_aborted` rows for the skipped steps. Nothing is
//! rolled back; earlier effects stand and recovery relies on retry and
//! replay.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::catalog::{CatalogService, CatalogSnapshot};
use crate::engine::{MaterializationPlan, PlanAction};
use crate::error::{Result, StoreError};
use crate::models::event::new_event_id;
use crate::models::rule::{resolve_amount, resolve_string};
use crate::models::{
    GameEvent, HistoryRewardType, RewardHistoryEntry, RewardSpec, RewardType, SpendingSpec,
    SpendingType, TransferStatus, UserState, WalletTransaction, WalletTransactionType,
};
use crate::storage::{RewardHistoryStore, UserStateStore, WalletStore};

/// Event types of synthetic cascade events.
pub const BADGE_GRANTED: &str = "BADGE_GRANTED";
pub const TROPHY_GRANTED: &str = "TROPHY_GRANTED";
pub const LEVEL_UP: &str = "LEVEL_UP";

/// What one plan application produced.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub entries: Vec<RewardHistoryEntry>,
    /// Synthetic events to feed back into the pipeline.
    pub cascades: Vec<GameEvent>,
}

/// Applies materialization plans. All wallet and state mutations for one
/// event run under the caller's per-user serialization.
pub struct RewardExecutor {
    catalog: Arc<CatalogService>,
    wallets: Arc<dyn WalletStore>,
    history: Arc<dyn RewardHistoryStore>,
    user_state: Arc<dyn UserStateStore>,
    max_cascade_depth: u32,
}

impl RewardExecutor {
    pub fn new(
        catalog: Arc<CatalogService>,
        wallets: Arc<dyn WalletStore>,
        history: Arc<dyn RewardHistoryStore>,
        user_state: Arc<dyn UserStateStore>,
        max_cascade_depth: u32,
    ) -> Self {
        Self {
            catalog,
            wallets,
            history,
            user_state,
            max_cascade_depth,
        }
    }

    /// Apply the plan for `trigger`, appending history in plan order and
    /// returning the cascade events to enqueue.
    pub async fn apply(
        &self,
        trigger: &GameEvent,
        plan: &MaterializationPlan,
    ) -> Result<ExecutionOutcome> {
        let snapshot = self.catalog.snapshot();
        let mut outcome = ExecutionOutcome::default();

        if plan.is_empty() {
            let entry = RewardHistoryEntry::new(
                &trigger.user_id,
                HistoryRewardType::NoMatch,
                "no_match",
                &trigger.event_id,
                true,
            )
            .with_detail("detail", json!("no_match"));
            outcome.entries.push(self.history.append(entry).await?);
            return Ok(outcome);
        }

        let mut state = self
            .user_state
            .get(&trigger.user_id)
            .await?
            .unwrap_or_else(|| UserState::new(&trigger.user_id));

        let mut aborted = false;
        for step in &plan.steps {
            if aborted {
                let entry = self
                    .skipped_entry(trigger, &step.action)
                    .with_detail("detail", json!("plan_aborted"))
                    .with_detail("ruleId", json!(step.rule_id));
                self.append_best_effort(entry, &mut outcome).await;
                continue;
            }

            let applied = match &step.action {
                PlanAction::Reward(reward) => {
                    self.apply_reward(trigger, &step.rule_id, reward, &snapshot, &mut state, &mut outcome)
                        .await
                }
                PlanAction::Spending(spending) => {
                    self.apply_spending(trigger, &step.rule_id, spending, &snapshot, &mut state, &mut outcome)
                        .await
                }
            };

            if let Err(err) = applied {
                error!(
                    event_id = %trigger.event_id,
                    rule_id = %step.rule_id,
                    %err,
                    "storage failure mid-plan, skipping remaining steps"
                );
                let entry = self
                    .skipped_entry(trigger, &step.action)
                    .with_message(err.to_string())
                    .with_detail("detail", json!("storage_error"))
                    .with_detail("ruleId", json!(step.rule_id));
                self.append_best_effort(entry, &mut outcome).await;
                aborted = true;
            }
        }

        state.updated_at = Utc::now();
        self.user_state.upsert(state).await?;
        Ok(outcome)
    }

    async fn apply_reward(
        &self,
        trigger: &GameEvent,
        rule_id: &str,
        reward: &RewardSpec,
        snapshot: &CatalogSnapshot,
        state: &mut UserState,
        outcome: &mut ExecutionOutcome,
    ) -> std::result::Result<(), StoreError> {
        let base = |reward_type: HistoryRewardType, success: bool| {
            RewardHistoryEntry::new(
                &trigger.user_id,
                reward_type,
                &reward.reward_id,
                &trigger.event_id,
                success,
            )
            .with_detail("ruleId", json!(rule_id))
        };

        match reward.reward_type {
            RewardType::Points => {
                let Some(category_id) = reward.target_id.as_deref() else {
                    let entry = base(HistoryRewardType::Points, false)
                        .with_detail("detail", json!("missing_target"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                };
                let Some(category) = snapshot.point_category(category_id) else {
                    let entry = base(HistoryRewardType::Points, false)
                        .with_message(format!("unknown point category '{}'", category_id))
                        .with_detail("detail", json!("unknown_point_category"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                };
                let Some(amount) = reward
                    .amount
                    .as_ref()
                    .and_then(|value| resolve_amount(value, trigger))
                else {
                    let entry = base(HistoryRewardType::Points, false)
                        .with_detail("detail", json!("invalid_amount"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                };

                let transaction_type = if amount >= 0 {
                    WalletTransactionType::Credit
                } else {
                    WalletTransactionType::Debit
                };
                let transaction = WalletTransaction::new(
                    &trigger.user_id,
                    category_id,
                    amount,
                    transaction_type,
                    Some(trigger.event_id.clone()),
                );

                match self
                    .wallets
                    .apply_transaction(transaction, category.allow_negative)
                    .await
                {
                    Ok(balance) => {
                        state
                            .points_by_category
                            .insert(category_id.to_string(), balance);
                        let entry = base(HistoryRewardType::Points, true)
                            .with_points(amount, category_id)
                            .with_detail("detail", json!("credited"))
                            .with_detail("balance", json!(balance));
                        self.append(entry, outcome).await?;
                        self.sync_level(trigger, snapshot, state, category_id, None, outcome)
                            .await?;
                    }
                    Err(StoreError::InsufficientBalance {
                        balance, requested, ..
                    }) => {
                        let entry = base(HistoryRewardType::Points, false)
                            .with_points(amount, category_id)
                            .with_message(format!(
                                "insufficient balance: have {}, need {}",
                                balance, requested
                            ))
                            .with_detail("detail", json!("insufficient_balance"));
                        self.append(entry, outcome).await?;
                    }
                    Err(other) => return Err(other),
                }
            }
            RewardType::Badge | RewardType::Trophy => {
                let is_badge = reward.reward_type == RewardType::Badge;
                let reward_type = if is_badge {
                    HistoryRewardType::Badge
                } else {
                    HistoryRewardType::Trophy
                };
                let Some(target_id) = reward.target_id.as_deref() else {
                    let entry =
                        base(reward_type, false).with_detail("detail", json!("missing_target"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                };
                let known = if is_badge {
                    snapshot.badge(target_id).is_some()
                } else {
                    snapshot.trophy(target_id).is_some()
                };
                if !known {
                    let entry = base(reward_type, false)
                        .with_message(format!("unknown {} '{}'", if is_badge { "badge" } else { "trophy" }, target_id))
                        .with_detail("detail", json!("unknown_target"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                }

                let already = if is_badge {
                    !state.badge_ids.insert(target_id.to_string())
                } else {
                    !state.trophy_ids.insert(target_id.to_string())
                };
                if already {
                    let entry = base(reward_type, true)
                        .with_detail("detail", json!("already_granted"))
                        .with_detail("targetId", json!(target_id));
                    self.append(entry, outcome).await?;
                } else {
                    let entry = base(reward_type, true)
                        .with_detail("detail", json!("granted"))
                        .with_detail("targetId", json!(target_id));
                    self.append(entry, outcome).await?;
                    let (event_type, key) = if is_badge {
                        (BADGE_GRANTED, "badgeId")
                    } else {
                        (TROPHY_GRANTED, "trophyId")
                    };
                    self.push_cascade(
                        trigger,
                        event_type,
                        HashMap::from([(key.to_string(), json!(target_id))]),
                        outcome,
                    );
                }
            }
            RewardType::Level => {
                let Some(category_id) = reward.target_id.as_deref() else {
                    let entry = base(HistoryRewardType::Level, false)
                        .with_detail("detail", json!("missing_target"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                };
                let changed = self
                    .sync_level(
                        trigger,
                        snapshot,
                        state,
                        category_id,
                        Some(reward.reward_id.as_str()),
                        outcome,
                    )
                    .await?;
                if !changed {
                    let entry = base(HistoryRewardType::Level, true)
                        .with_detail("detail", json!("unchanged"))
                        .with_detail("category", json!(category_id));
                    self.append(entry, outcome).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_spending(
        &self,
        trigger: &GameEvent,
        rule_id: &str,
        spending: &SpendingSpec,
        snapshot: &CatalogSnapshot,
        state: &mut UserState,
        outcome: &mut ExecutionOutcome,
    ) -> std::result::Result<(), StoreError> {
        let reward_type = match spending.spending_type {
            SpendingType::Transaction => HistoryRewardType::Transaction,
            SpendingType::Transfer => HistoryRewardType::Transfer,
        };
        let base = |success: bool| {
            RewardHistoryEntry::new(
                &trigger.user_id,
                reward_type,
                &spending.spending_id,
                &trigger.event_id,
                success,
            )
            .with_detail("ruleId", json!(rule_id))
        };

        let Some(category) = snapshot.point_category(&spending.category) else {
            let entry = base(false)
                .with_message(format!("unknown point category '{}'", spending.category))
                .with_detail("detail", json!("unknown_point_category"));
            self.append(entry, outcome).await?;
            return Ok(());
        };
        if !category.allow_spend {
            let entry = base(false)
                .with_message(format!("category '{}' does not allow spending", category.id))
                .with_detail("detail", json!("spend_not_allowed"));
            self.append(entry, outcome).await?;
            return Ok(());
        }
        let Some(amount) = spending
            .attributes
            .get("amount")
            .and_then(|value| resolve_amount(value, trigger))
        else {
            let entry = base(false).with_detail("detail", json!("invalid_amount"));
            self.append(entry, outcome).await?;
            return Ok(());
        };

        match spending.spending_type {
            SpendingType::Transaction => {
                let transaction = WalletTransaction::new(
                    &trigger.user_id,
                    &spending.category,
                    -amount.abs(),
                    WalletTransactionType::Debit,
                    Some(trigger.event_id.clone()),
                );
                match self
                    .wallets
                    .apply_transaction(transaction, category.allow_negative)
                    .await
                {
                    Ok(balance) => {
                        state
                            .points_by_category
                            .insert(spending.category.clone(), balance);
                        let entry = base(true)
                            .with_points(-amount.abs(), &spending.category)
                            .with_detail("detail", json!("debited"))
                            .with_detail("balance", json!(balance));
                        self.append(entry, outcome).await?;
                        self.sync_level(trigger, snapshot, state, &spending.category, None, outcome)
                            .await?;
                    }
                    Err(StoreError::InsufficientBalance {
                        balance, requested, ..
                    }) => {
                        let entry = base(false)
                            .with_points(-amount.abs(), &spending.category)
                            .with_message(format!(
                                "insufficient balance: have {}, need {}",
                                balance, requested
                            ))
                            .with_detail("detail", json!("insufficient_balance"));
                        self.append(entry, outcome).await?;
                    }
                    Err(other) => return Err(other),
                }
            }
            SpendingType::Transfer => {
                let source = spending
                    .attributes
                    .get("source")
                    .and_then(|value| resolve_string(value, trigger));
                let destination = spending
                    .attributes
                    .get("destination")
                    .and_then(|value| resolve_string(value, trigger));
                let (Some(source), Some(destination)) = (source, destination) else {
                    let entry = base(false).with_detail("detail", json!("invalid_transfer_parties"));
                    self.append(entry, outcome).await?;
                    return Ok(());
                };

                let transfer = self
                    .wallets
                    .apply_transfer(&source, &destination, &spending.category, amount)
                    .await?;
                let completed = transfer.status == TransferStatus::Completed;
                let mut entry = base(completed)
                    .with_points(-amount, &spending.category)
                    .with_detail(
                        "detail",
                        json!(if completed { "transfer_completed" } else { "transfer_failed" }),
                    )
                    .with_detail("transferId", json!(transfer.id.to_string()))
                    .with_detail("source", json!(source))
                    .with_detail("destination", json!(destination));
                if let Some(reason) = &transfer.failure_reason {
                    entry = entry.with_message(reason.clone());
                }
                self.append(entry, outcome).await?;

                if completed {
                    // Refresh both sides' projections from the wallet, which
                    // stays authoritative for balances.
                    self.refresh_party(trigger, snapshot, state, &source, &spending.category, outcome)
                        .await?;
                    self.refresh_party(trigger, snapshot, state, &destination, &spending.category, outcome)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Refresh one transfer party's balance projection (and level) for the
    /// category. The trigger's own state row is updated in place; the other
    /// party's row is loaded, updated, and stored.
    async fn refresh_party(
        &self,
        trigger: &GameEvent,
        snapshot: &CatalogSnapshot,
        state: &mut UserState,
        user_id: &str,
        category: &str,
        outcome: &mut ExecutionOutcome,
    ) -> std::result::Result<(), StoreError> {
        let balance = self.wallets.balance(user_id, category).await?;
        if user_id == trigger.user_id {
            state.points_by_category.insert(category.to_string(), balance);
            self.sync_level(trigger, snapshot, state, category, None, outcome)
                .await?;
        } else {
            let mut other = self
                .user_state
                .get(user_id)
                .await?
                .unwrap_or_else(|| UserState::new(user_id));
            other.points_by_category.insert(category.to_string(), balance);
            if let Some(level) = snapshot.qualifying_level(category, balance) {
                other
                    .current_levels_by_category
                    .insert(category.to_string(), level.id.clone());
            }
            other.updated_at = Utc::now();
            self.user_state.upsert(other).await?;
        }
        Ok(())
    }

    /// Recompute the qualifying level for `(user, category)`. On change,
    /// update the state, record a `level` history row, and emit a `LEVEL_UP`
    /// cascade for upgrades. Returns whether the level changed.
    async fn sync_level(
        &self,
        trigger: &GameEvent,
        snapshot: &CatalogSnapshot,
        state: &mut UserState,
        category: &str,
        reward_id: Option<&str>,
        outcome: &mut ExecutionOutcome,
    ) -> std::result::Result<bool, StoreError> {
        let balance = self.wallets.balance(&trigger.user_id, category).await?;
        let Some(new_level) = snapshot.qualifying_level(category, balance) else {
            return Ok(false);
        };

        let old_id = state.current_levels_by_category.get(category).cloned();
        if old_id.as_deref() == Some(new_level.id.as_str()) {
            return Ok(false);
        }

        let upgraded = old_id
            .as_deref()
            .and_then(|id| snapshot.levels_for(category).iter().find(|l| l.id == id))
            .map(|old| new_level.min_points > old.min_points)
            .unwrap_or(true);

        state
            .current_levels_by_category
            .insert(category.to_string(), new_level.id.clone());

        let entry = RewardHistoryEntry::new(
            &trigger.user_id,
            HistoryRewardType::Level,
            reward_id.unwrap_or(new_level.id.as_str()),
            &trigger.event_id,
            true,
        )
        .with_detail("detail", json!("level_changed"))
        .with_detail("category", json!(category))
        .with_detail("from", json!(old_id))
        .with_detail("to", json!(new_level.id));
        self.append(entry, outcome).await?;

        if upgraded {
            self.push_cascade(
                trigger,
                LEVEL_UP,
                HashMap::from([
                    ("category".to_string(), json!(category)),
                    ("from".to_string(), json!(old_id)),
                    ("to".to_string(), json!(new_level.id)),
                ]),
                outcome,
            );
        }
        Ok(true)
    }

    fn push_cascade(
        &self,
        trigger: &GameEvent,
        event_type: &str,
        attributes: HashMap<String, Value>,
        outcome: &mut ExecutionOutcome,
    ) {
        let depth = trigger.cascade_depth + 1;
        if depth > self.max_cascade_depth {
            warn!(
                event_id = %trigger.event_id,
                event_type,
                depth,
                limit = self.max_cascade_depth,
                "cascade depth limit reached, dropping synthetic event"
            );
            return;
        }
        debug!(event_type, user_id = %trigger.user_id, depth, "emitting cascade event");
        outcome.cascades.push(GameEvent {
            event_id: new_event_id(),
            event_type: event_type.to_string(),
            user_id: trigger.user_id.clone(),
            occurred_at: Utc::now(),
            attributes,
            cascade_depth: depth,
        });
    }

    fn skipped_entry(&self, trigger: &GameEvent, action: &PlanAction) -> RewardHistoryEntry {
        let (reward_type, reward_id) = match action {
            PlanAction::Reward(reward) => (
                match reward.reward_type {
                    RewardType::Points => HistoryRewardType::Points,
                    RewardType::Badge => HistoryRewardType::Badge,
                    RewardType::Trophy => HistoryRewardType::Trophy,
                    RewardType::Level => HistoryRewardType::Level,
                },
                reward.reward_id.clone(),
            ),
            PlanAction::Spending(spending) => (
                match spending.spending_type {
                    SpendingType::Transaction => HistoryRewardType::Transaction,
                    SpendingType::Transfer => HistoryRewardType::Transfer,
                },
                spending.spending_id.clone(),
            ),
        };
        RewardHistoryEntry::new(
            &trigger.user_id,
            reward_type,
            reward_id,
            &trigger.event_id,
            false,
        )
    }

    async fn append(
        &self,
        entry: RewardHistoryEntry,
        outcome: &mut ExecutionOutcome,
    ) -> std::result::Result<(), StoreError> {
        let stored = self.history.append(entry).await?;
        outcome.entries.push(stored);
        Ok(())
    }

    /// Used for plan-abort bookkeeping, where the history store itself may
    /// be the failing backend.
    async fn append_best_effort(&self, entry: RewardHistoryEntry, outcome: &mut ExecutionOutcome) {
        match self.history.append(entry).await {
            Ok(stored) => outcome.entries.push(stored),
            Err(err) => error!(%err, "failed to record plan_aborted history entry"),
        }
    }
}
