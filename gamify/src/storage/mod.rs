//! Storage traits for events, wallets, reward history, and user state
//!
//! The engine is written against these traits; `memory` holds the reference
//! implementations used by tests and single-node deployments. A database
//! backend substitutes its own implementations behind the same contracts.

mod memory;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    GameEvent, HistoryRewardType, RewardHistoryEntry, UserState, Wallet, WalletTransaction,
    WalletTransfer,
};

pub use memory::{
    InMemoryEventStore, InMemoryRewardHistoryStore, InMemoryUserStateStore, InMemoryWalletStore,
};

/// Append-only log of ingested events with a processing marker per event.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Persist an event. Fails with [`StoreError::Duplicate`] on a reused id.
    async fn append(&self, event: &GameEvent) -> Result<(), StoreError>;

    async fn get(&self, event_id: &str) -> Result<Option<GameEvent>, StoreError>;

    /// All events for a user, ascending by `occurredAt` (ties break by
    /// insertion order).
    async fn events_for_user(&self, user_id: &str) -> Result<Vec<GameEvent>, StoreError>;

    /// Flag an event as fully processed so queue rehydration skips it.
    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError>;

    /// Events whose processing marker is absent, in enqueue order. Used to
    /// rehydrate the ingest queue on startup.
    async fn unprocessed(&self) -> Result<Vec<GameEvent>, StoreError>;

    /// Delete up to `batch_size` events older than `horizon`. Returns the
    /// number deleted.
    async fn delete_older_than(
        &self,
        horizon: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Per-`(userId, pointCategoryId)` balances with an ordered transaction
/// ledger and a transfer table for two-sided moves.
#[async_trait::async_trait]
pub trait WalletStore: Send + Sync {
    async fn balance(&self, user_id: &str, category: &str) -> Result<i64, StoreError>;

    /// Balance plus ledger. An untouched wallet reads as empty with balance
    /// zero; rows are created lazily on first credit or debit.
    async fn wallet(&self, user_id: &str, category: &str) -> Result<Wallet, StoreError>;

    async fn wallets_for_user(&self, user_id: &str) -> Result<Vec<Wallet>, StoreError>;

    /// Atomically check and append a ledger entry, returning the new
    /// balance. When `allow_negative` is false a debit that would push the
    /// balance below zero fails with [`StoreError::InsufficientBalance`] and
    /// writes nothing.
    async fn apply_transaction(
        &self,
        transaction: WalletTransaction,
        allow_negative: bool,
    ) -> Result<i64, StoreError>;

    /// Run a two-sided transfer: create the record `pending`, then either
    /// flip it to `completed` together with exactly one `transferOut` and
    /// one `transferIn` entry referencing it, or to `failed` with a reason
    /// and no entries. The returned record carries the outcome.
    async fn apply_transfer(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        category: &str,
        amount: i64,
    ) -> Result<WalletTransfer, StoreError>;

    async fn transfer(&self, transfer_id: &str) -> Result<Option<WalletTransfer>, StoreError>;

    async fn transactions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<WalletTransaction>, StoreError>;
}

/// Immutable record of every reward materialization, including failures.
#[async_trait::async_trait]
pub trait RewardHistoryStore: Send + Sync {
    /// Append an entry. `awardedAt` is kept monotone per user in insertion
    /// order.
    async fn append(&self, entry: RewardHistoryEntry) -> Result<RewardHistoryEntry, StoreError>;

    async fn for_user(&self, user_id: &str) -> Result<Vec<RewardHistoryEntry>, StoreError>;

    async fn for_user_by_type(
        &self,
        user_id: &str,
        reward_type: HistoryRewardType,
    ) -> Result<Vec<RewardHistoryEntry>, StoreError>;

    async fn for_event(&self, event_id: &str) -> Result<Vec<RewardHistoryEntry>, StoreError>;
}

/// Denormalized per-user projection rows.
#[async_trait::async_trait]
pub trait UserStateStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<UserState>, StoreError>;

    async fn upsert(&self, state: UserState) -> Result<(), StoreError>;
}
