//! Reward history: the immutable record of every materialization

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of materialization a history row records. `NoMatch` is the
/// bookkeeping entry written when an event matched no rule, so that every
/// processed event leaves a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryRewardType {
    Points,
    Badge,
    Trophy,
    Level,
    Transaction,
    Transfer,
    NoMatch,
}

/// Append-only record of a reward or spending materialization, including
/// failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardHistoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub reward_type: HistoryRewardType,
    /// Reward/spending id from the rule, or a synthetic marker for
    /// bookkeeping rows.
    pub reward_id: String,
    #[serde(default)]
    pub points_amount: Option<i64>,
    #[serde(default)]
    pub point_category: Option<String>,
    pub trigger_event_id: String,
    pub awarded_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl RewardHistoryEntry {
    pub fn new(
        user_id: impl Into<String>,
        reward_type: HistoryRewardType,
        reward_id: impl Into<String>,
        trigger_event_id: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            reward_type,
            reward_id: reward_id.into(),
            points_amount: None,
            point_category: None,
            trigger_event_id: trigger_event_id.into(),
            awarded_at: Utc::now(),
            success,
            message: None,
            details: HashMap::new(),
        }
    }

    pub fn with_points(mut self, amount: i64, category: impl Into<String>) -> Self {
        self.points_amount = Some(amount);
        self.point_category = Some(category.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Short classification used by tests and operators, mirrored into the
    /// `details` map under `"detail"` by the executor.
    pub fn detail_str(&self) -> Option<&str> {
        self.details.get("detail").and_then(|v| v.as_str())
    }
}
