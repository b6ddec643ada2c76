//! Per-user denormalized state projection

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of everything a user has accumulated: balances by category,
/// badge and trophy sets, and the current level per category. Derived from
/// the wallet ledger and reward history; rebuildable from both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub user_id: String,
    #[serde(default)]
    pub points_by_category: HashMap<String, i64>,
    #[serde(default)]
    pub badge_ids: BTreeSet<String>,
    #[serde(default)]
    pub trophy_ids: BTreeSet<String>,
    #[serde(default)]
    pub current_levels_by_category: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl UserState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            points_by_category: HashMap::new(),
            badge_ids: BTreeSet::new(),
            trophy_ids: BTreeSet::new(),
            current_levels_by_category: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn balance(&self, category: &str) -> i64 {
        self.points_by_category.get(category).copied().unwrap_or(0)
    }

    pub fn has_badge(&self, badge_id: &str) -> bool {
        self.badge_ids.contains(badge_id)
    }

    pub fn has_trophy(&self, trophy_id: &str) -> bool {
        self.trophy_ids.contains(trophy_id)
    }

    pub fn current_level(&self, category: &str) -> Option<&str> {
        self.current_levels_by_category.get(category).map(String::as_str)
    }

    /// Equality that ignores the bookkeeping timestamp, used by the
    /// projection integrity check.
    pub fn same_content(&self, other: &UserState) -> bool {
        self.user_id == other.user_id
            && self.points_by_category == other.points_by_category
            && self.badge_ids == other.badge_ids
            && self.trophy_ids == other.trophy_ids
            && self.current_levels_by_category == other.current_levels_by_category
    }
}
