//! User-state projection rebuild
//!
//! The wallet ledger is authoritative for balances; reward history is
//! authoritative for badge and trophy grants; levels derive from balances
//! and the catalog. Folding all three reproduces the stored projection row,
//! which is what the integrity check asserts.

use std::sync::Arc;

use chrono::Utc;

use crate::catalog::CatalogService;
use crate::error::Result;
use crate::models::{HistoryRewardType, UserState};
use crate::storage::{RewardHistoryStore, UserStateStore, WalletStore};

/// Rebuilds projections from the ledger and history, for integrity checks
/// and recovery.
pub struct ProjectionRebuilder {
    catalog: Arc<CatalogService>,
    wallets: Arc<dyn WalletStore>,
    history: Arc<dyn RewardHistoryStore>,
    user_state: Arc<dyn UserStateStore>,
}

impl ProjectionRebuilder {
    pub fn new(
        catalog: Arc<CatalogService>,
        wallets: Arc<dyn WalletStore>,
        history: Arc<dyn RewardHistoryStore>,
        user_state: Arc<dyn UserStateStore>,
    ) -> Self {
        Self {
            catalog,
            wallets,
            history,
            user_state,
        }
    }

    /// Compute a user's state from scratch without touching the stored row.
    pub async fn rebuild(&self, user_id: &str) -> Result<UserState> {
        let snapshot = self.catalog.snapshot();
        let mut state = UserState::new(user_id);

        for wallet in self.wallets.wallets_for_user(user_id).await? {
            state
                .points_by_category
                .insert(wallet.point_category_id.clone(), wallet.balance);
            if let Some(level) = snapshot.qualifying_level(&wallet.point_category_id, wallet.balance)
            {
                state
                    .current_levels_by_category
                    .insert(wallet.point_category_id.clone(), level.id.clone());
            }
        }

        for entry in self.history.for_user(user_id).await? {
            if !entry.success {
                continue;
            }
            let target = entry
                .details
                .get("targetId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            match (entry.reward_type, target) {
                (HistoryRewardType::Badge, Some(badge_id)) => {
                    state.badge_ids.insert(badge_id);
                }
                (HistoryRewardType::Trophy, Some(trophy_id)) => {
                    state.trophy_ids.insert(trophy_id);
                }
                _ => {}
            }
        }

        state.updated_at = Utc::now();
        Ok(state)
    }

    /// Whether the stored projection matches a fresh rebuild. A user with no
    /// stored row verifies against an empty rebuild.
    pub async fn verify(&self, user_id: &str) -> Result<bool> {
        let rebuilt = self.rebuild(user_id).await?;
        let stored = self
            .user_state
            .get(user_id)
            .await?
            .unwrap_or_else(|| UserState::new(user_id));
        Ok(stored.same_content(&rebuilt))
    }

    /// Rebuild and persist, returning the fresh state.
    pub async fn repair(&self, user_id: &str) -> Result<UserState> {
        let rebuilt = self.rebuild(user_id).await?;
        self.user_state.upsert(rebuilt.clone()).await?;
        Ok(rebuilt)
    }
}
