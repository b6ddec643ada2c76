//! In-memory storage implementations for development and testing

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    GameEvent, HistoryRewardType, RewardHistoryEntry, TransferStatus, UserState, Wallet,
    WalletTransaction, WalletTransactionType, WalletTransfer,
};
use crate::storage::{EventStore, RewardHistoryStore, UserStateStore, WalletStore};

/// Append-only event log with insertion sequence and processing markers.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<EventLog>,
}

#[derive(Debug, Default)]
struct EventLog {
    /// Events in insertion (enqueue) order.
    events: Vec<GameEvent>,
    by_id: HashMap<String, usize>,
    processed: HashSet<String>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &GameEvent) -> Result<(), StoreError> {
        let mut log = self.inner.write().unwrap();
        if log.by_id.contains_key(&event.event_id) {
            return Err(StoreError::Duplicate(event.event_id.clone()));
        }
        let index = log.events.len();
        log.by_id.insert(event.event_id.clone(), index);
        log.events.push(event.clone());
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<GameEvent>, StoreError> {
        let log = self.inner.read().unwrap();
        Ok(log.by_id.get(event_id).map(|&i| log.events[i].clone()))
    }

    async fn events_for_user(&self, user_id: &str) -> Result<Vec<GameEvent>, StoreError> {
        let log = self.inner.read().unwrap();
        let mut events: Vec<(usize, GameEvent)> = log
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.user_id == user_id)
            .map(|(i, e)| (i, e.clone()))
            .collect();
        events.sort_by(|(ia, a), (ib, b)| a.occurred_at.cmp(&b.occurred_at).then(ia.cmp(ib)));
        Ok(events.into_iter().map(|(_, e)| e).collect())
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        let mut log = self.inner.write().unwrap();
        if !log.by_id.contains_key(event_id) {
            return Err(StoreError::NotFound(format!("event {}", event_id)));
        }
        log.processed.insert(event_id.to_string());
        Ok(())
    }

    async fn unprocessed(&self) -> Result<Vec<GameEvent>, StoreError> {
        let log = self.inner.read().unwrap();
        Ok(log
            .events
            .iter()
            .filter(|e| !log.processed.contains(&e.event_id))
            .cloned()
            .collect())
    }

    async fn delete_older_than(
        &self,
        horizon: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        let mut guard = self.inner.write().unwrap();
        let log = &mut *guard;
        let victims: Vec<String> = log
            .events
            .iter()
            .filter(|e| e.occurred_at < horizon)
            .take(batch_size)
            .map(|e| e.event_id.clone())
            .collect();

        if victims.is_empty() {
            return Ok(0);
        }

        let victim_set: HashSet<&String> = victims.iter().collect();
        log.events.retain(|e| !victim_set.contains(&e.event_id));
        log.by_id.clear();
        for (i, event) in log.events.iter().enumerate() {
            log.by_id.insert(event.event_id.clone(), i);
        }
        for id in &victims {
            log.processed.remove(id);
        }
        Ok(victims.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().unwrap().events.len())
    }
}

/// Wallets keyed by `(userId, pointCategoryId)` plus the transfer table.
#[derive(Debug, Default)]
pub struct InMemoryWalletStore {
    inner: RwLock<WalletTable>,
}

#[derive(Debug, Default)]
struct WalletTable {
    ledgers: HashMap<(String, String), Vec<WalletTransaction>>,
    transfers: HashMap<Uuid, WalletTransfer>,
}

impl WalletTable {
    fn balance(&self, user_id: &str, category: &str) -> i64 {
        self.ledgers
            .get(&(user_id.to_string(), category.to_string()))
            .map(|txs| txs.iter().map(|t| t.amount).sum())
            .unwrap_or(0)
    }
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn balance(&self, user_id: &str, category: &str) -> Result<i64, StoreError> {
        Ok(self.inner.read().unwrap().balance(user_id, category))
    }

    async fn wallet(&self, user_id: &str, category: &str) -> Result<Wallet, StoreError> {
        let table = self.inner.read().unwrap();
        let transactions = table
            .ledgers
            .get(&(user_id.to_string(), category.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(Wallet {
            user_id: user_id.to_string(),
            point_category_id: category.to_string(),
            balance: transactions.iter().map(|t| t.amount).sum(),
            transactions,
        })
    }

    async fn wallets_for_user(&self, user_id: &str) -> Result<Vec<Wallet>, StoreError> {
        let table = self.inner.read().unwrap();
        let mut wallets: Vec<Wallet> = table
            .ledgers
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((user, category), transactions)| Wallet {
                user_id: user.clone(),
                point_category_id: category.clone(),
                balance: transactions.iter().map(|t| t.amount).sum(),
                transactions: transactions.clone(),
            })
            .collect();
        wallets.sort_by(|a, b| a.point_category_id.cmp(&b.point_category_id));
        Ok(wallets)
    }

    async fn apply_transaction(
        &self,
        transaction: WalletTransaction,
        allow_negative: bool,
    ) -> Result<i64, StoreError> {
        let mut table = self.inner.write().unwrap();
        let current = table.balance(&transaction.user_id, &transaction.point_category_id);
        let next = current + transaction.amount;
        if next < 0 && !allow_negative {
            return Err(StoreError::InsufficientBalance {
                user_id: transaction.user_id.clone(),
                category: transaction.point_category_id.clone(),
                balance: current,
                requested: transaction.amount.abs(),
            });
        }
        table
            .ledgers
            .entry((
                transaction.user_id.clone(),
                transaction.point_category_id.clone(),
            ))
            .or_default()
            .push(transaction);
        Ok(next)
    }

    async fn apply_transfer(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        category: &str,
        amount: i64,
    ) -> Result<WalletTransfer, StoreError> {
        let mut table = self.inner.write().unwrap();

        let mut transfer = WalletTransfer {
            id: Uuid::new_v4(),
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            point_category_id: category.to_string(),
            amount,
            status: TransferStatus::Pending,
            timestamp: Utc::now(),
            failure_reason: None,
        };

        let source_balance = table.balance(from_user_id, category);
        if amount <= 0 {
            transfer.status = TransferStatus::Failed;
            transfer.failure_reason = Some("transfer amount must be positive".to_string());
        } else if source_balance < amount {
            transfer.status = TransferStatus::Failed;
            transfer.failure_reason = Some(format!(
                "insufficient balance: have {}, need {}",
                source_balance, amount
            ));
        } else {
            let reference = transfer.id.to_string();
            table
                .ledgers
                .entry((from_user_id.to_string(), category.to_string()))
                .or_default()
                .push(WalletTransaction::new(
                    from_user_id,
                    category,
                    -amount,
                    WalletTransactionType::TransferOut,
                    Some(reference.clone()),
                ));
            table
                .ledgers
                .entry((to_user_id.to_string(), category.to_string()))
                .or_default()
                .push(WalletTransaction::new(
                    to_user_id,
                    category,
                    amount,
                    WalletTransactionType::TransferIn,
                    Some(reference),
                ));
            transfer.status = TransferStatus::Completed;
        }

        table.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn transfer(&self, transfer_id: &str) -> Result<Option<WalletTransfer>, StoreError> {
        let id = Uuid::parse_str(transfer_id)
            .map_err(|_| StoreError::NotFound(format!("transfer {}", transfer_id)))?;
        Ok(self.inner.read().unwrap().transfers.get(&id).cloned())
    }

    async fn transactions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<WalletTransaction>, StoreError> {
        let table = self.inner.read().unwrap();
        let mut transactions: Vec<WalletTransaction> = table
            .ledgers
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .flat_map(|(_, txs)| txs.clone())
            .collect();
        transactions.sort_by_key(|t| t.timestamp);
        Ok(transactions)
    }
}

/// Append-only reward history with per-user `awardedAt` monotonicity.
#[derive(Debug, Default)]
pub struct InMemoryRewardHistoryStore {
    inner: RwLock<Vec<RewardHistoryEntry>>,
}

impl InMemoryRewardHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RewardHistoryStore for InMemoryRewardHistoryStore {
    async fn append(&self, mut entry: RewardHistoryEntry) -> Result<RewardHistoryEntry, StoreError> {
        let mut entries = self.inner.write().unwrap();
        // awardedAt is monotone per user in insertion order even if the
        // clock steps backwards between appends.
        if let Some(last) = entries
            .iter()
            .rev()
            .find(|e| e.user_id == entry.user_id)
        {
            if entry.awarded_at < last.awarded_at {
                entry.awarded_at = last.awarded_at;
            }
        }
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn for_user(&self, user_id: &str) -> Result<Vec<RewardHistoryEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn for_user_by_type(
        &self,
        user_id: &str,
        reward_type: HistoryRewardType,
    ) -> Result<Vec<RewardHistoryEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id && e.reward_type == reward_type)
            .cloned()
            .collect())
    }

    async fn for_event(&self, event_id: &str) -> Result<Vec<RewardHistoryEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.trigger_event_id == event_id)
            .cloned()
            .collect())
    }
}

/// Projection rows keyed by user id.
#[derive(Debug, Default)]
pub struct InMemoryUserStateStore {
    inner: RwLock<HashMap<String, UserState>>,
}

impl InMemoryUserStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserStateStore for InMemoryUserStateStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserState>, StoreError> {
        Ok(self.inner.read().unwrap().get(user_id).cloned())
    }

    async fn upsert(&self, state: UserState) -> Result<(), StoreError> {
        self.inner
            .write()
            .unwrap()
            .insert(state.user_id.clone(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(id: &str, user: &str, event_type: &str, occurred_at: DateTime<Utc>) -> GameEvent {
        GameEvent {
            event_id: id.to_string(),
            event_type: event_type.to_string(),
            user_id: user.to_string(),
            occurred_at,
            attributes: HashMap::new(),
            cascade_depth: 0,
        }
    }

    #[tokio::test]
    async fn event_store_rejects_duplicate_ids() {
        let store = InMemoryEventStore::new();
        let e = event("e1", "u1", "LOGIN", Utc::now());
        store.append(&e).await.unwrap();
        assert_eq!(
            store.append(&e).await.unwrap_err(),
            StoreError::Duplicate("e1".to_string())
        );
    }

    #[tokio::test]
    async fn events_for_user_sorted_by_occurred_at() {
        let store = InMemoryEventStore::new();
        let now = Utc::now();
        store.append(&event("e2", "u1", "B", now)).await.unwrap();
        store
            .append(&event("e1", "u1", "A", now - Duration::minutes(10)))
            .await
            .unwrap();
        store.append(&event("e3", "u2", "C", now)).await.unwrap();

        let events = store.events_for_user("u1").await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.event_id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2"]
        );
    }

    #[tokio::test]
    async fn unprocessed_respects_markers_and_order() {
        let store = InMemoryEventStore::new();
        let now = Utc::now();
        store.append(&event("e1", "u1", "A", now)).await.unwrap();
        store.append(&event("e2", "u1", "A", now)).await.unwrap();
        store.mark_processed("e1").await.unwrap();

        let pending = store.unprocessed().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, "e2");
    }

    #[tokio::test]
    async fn retention_deletes_in_batches() {
        let store = InMemoryEventStore::new();
        let old = Utc::now() - Duration::days(2);
        for i in 0..5 {
            store
                .append(&event(&format!("e{}", i), "u1", "A", old))
                .await
                .unwrap();
        }
        let horizon = Utc::now() - Duration::days(1);
        assert_eq!(store.delete_older_than(horizon, 3).await.unwrap(), 3);
        assert_eq!(store.delete_older_than(horizon, 3).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wallet_balance_equals_ledger_sum() {
        let store = InMemoryWalletStore::new();
        store
            .apply_transaction(
                WalletTransaction::new("u1", "xp", 100, WalletTransactionType::Credit, None),
                false,
            )
            .await
            .unwrap();
        store
            .apply_transaction(
                WalletTransaction::new("u1", "xp", -30, WalletTransactionType::Debit, None),
                false,
            )
            .await
            .unwrap();

        let wallet = store.wallet("u1", "xp").await.unwrap();
        assert_eq!(wallet.balance, 70);
        assert!(wallet.is_consistent());
    }

    #[tokio::test]
    async fn debit_below_zero_rejected_for_non_negative_category() {
        let store = InMemoryWalletStore::new();
        let result = store
            .apply_transaction(
                WalletTransaction::new("u1", "xp", -10, WalletTransactionType::Debit, None),
                false,
            )
            .await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance { balance: 0, .. })
        ));
        // Nothing was written.
        assert_eq!(store.wallet("u1", "xp").await.unwrap().transactions.len(), 0);
    }

    #[tokio::test]
    async fn negative_category_allows_overdraft() {
        let store = InMemoryWalletStore::new();
        let balance = store
            .apply_transaction(
                WalletTransaction::new("u1", "karma", -10, WalletTransactionType::Debit, None),
                true,
            )
            .await
            .unwrap();
        assert_eq!(balance, -10);
    }

    #[tokio::test]
    async fn completed_transfer_writes_exactly_two_entries() {
        let store = InMemoryWalletStore::new();
        store
            .apply_transaction(
                WalletTransaction::new("a", "xp", 200, WalletTransactionType::Credit, None),
                false,
            )
            .await
            .unwrap();

        let transfer = store.apply_transfer("a", "b", "xp", 150).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(store.balance("a", "xp").await.unwrap(), 50);
        assert_eq!(store.balance("b", "xp").await.unwrap(), 150);

        let reference = transfer.id.to_string();
        let out: Vec<_> = store
            .transactions_for_user("a")
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.reference_id.as_deref() == Some(reference.as_str()))
            .collect();
        let into: Vec<_> = store
            .transactions_for_user("b")
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.reference_id.as_deref() == Some(reference.as_str()))
            .collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].transaction_type, WalletTransactionType::TransferOut);
        assert_eq!(into.len(), 1);
        assert_eq!(into[0].transaction_type, WalletTransactionType::TransferIn);
    }

    #[tokio::test]
    async fn failed_transfer_writes_no_entries() {
        let store = InMemoryWalletStore::new();
        store
            .apply_transaction(
                WalletTransaction::new("a", "xp", 50, WalletTransactionType::Credit, None),
                false,
            )
            .await
            .unwrap();

        let transfer = store.apply_transfer("a", "b", "xp", 100).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Failed);
        assert!(transfer.failure_reason.is_some());
        assert_eq!(store.balance("a", "xp").await.unwrap(), 50);
        assert_eq!(store.balance("b", "xp").await.unwrap(), 0);
        assert_eq!(store.transactions_for_user("b").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn history_awarded_at_is_monotone_per_user() {
        let store = InMemoryRewardHistoryStore::new();
        let mut first = RewardHistoryEntry::new("u1", HistoryRewardType::Points, "r1", "e1", true);
        first.awarded_at = Utc::now();
        let mut second = RewardHistoryEntry::new("u1", HistoryRewardType::Points, "r2", "e2", true);
        second.awarded_at = first.awarded_at - Duration::seconds(30);

        store.append(first.clone()).await.unwrap();
        let stored = store.append(second).await.unwrap();
        assert!(stored.awarded_at >= first.awarded_at);
    }

    #[tokio::test]
    async fn user_state_round_trips() {
        let store = InMemoryUserStateStore::new();
        let mut state = UserState::new("u1");
        state.badge_ids.insert("badge-commenter".to_string());
        store.upsert(state.clone()).await.unwrap();
        let loaded = store.get("u1").await.unwrap().unwrap();
        assert!(loaded.same_content(&state));
    }
}
