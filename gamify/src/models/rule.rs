//! Rule representation: triggers, conditions, rewards, spendings

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::event::GameEvent;

/// Closed set of condition variants the evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    AlwaysTrue,
    AttributeEquals,
    Count,
    Threshold,
    Sequence,
    TimeSinceLastEvent,
    FirstOccurrence,
    CustomScript,
}

/// Closed set of reward variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RewardType {
    Points,
    Badge,
    Trophy,
    Level,
}

/// Spending variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpendingType {
    Transaction,
    Transfer,
}

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

/// One condition inside a rule. Parameters are a free-form map whose schema
/// is fixed per condition type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSpec {
    pub condition_id: String,
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

/// One reward inside a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSpec {
    pub reward_id: String,
    #[serde(rename = "type")]
    pub reward_type: RewardType,
    /// Point category for `points`, badge/trophy id for `badge`/`trophy`,
    /// point category for `level`.
    #[serde(default)]
    pub target_id: Option<String>,
    /// Signed amount for `points`; either a literal number or an
    /// `"attr:name"` reference into the trigger event.
    #[serde(default)]
    pub amount: Option<Value>,
}

/// One spending inside a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingSpec {
    pub spending_id: String,
    #[serde(rename = "type")]
    pub spending_type: SpendingType,
    pub category: String,
    /// `amount` for transactions; `source`, `destination`, `amount` for
    /// transfers. Values may be literals or `"attr:name"` references.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// A user-authored rule: when any trigger fires and the conditions hold,
/// materialize the rewards and spendings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub triggers: Vec<String>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    pub conditions: Vec<ConditionSpec>,
    pub rewards: Vec<RewardSpec>,
    #[serde(default)]
    pub spendings: Vec<SpendingSpec>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Whether this rule is eligible for the given trigger event.
    pub fn matches_trigger(&self, event: &GameEvent) -> bool {
        self.triggers.iter().any(|t| event.is_type(t))
    }

    /// Well-formedness check run at catalog load and on update. Returns the
    /// list of violations; empty means well-formed.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.rule_id.trim().is_empty() {
            errors.push("ruleId must be non-empty".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push(format!("rule '{}': name must be non-empty", self.rule_id));
        }
        if self.triggers.is_empty() {
            errors.push(format!("rule '{}': triggers must be non-empty", self.rule_id));
        }
        if self.conditions.is_empty() {
            errors.push(format!("rule '{}': conditions must be non-empty", self.rule_id));
        }
        if self.rewards.is_empty() {
            errors.push(format!("rule '{}': rewards must be non-empty", self.rule_id));
        }

        let mut condition_ids = HashSet::new();
        for condition in &self.conditions {
            if condition.condition_id.trim().is_empty() {
                errors.push(format!("rule '{}': conditionId must be non-empty", self.rule_id));
            } else if !condition_ids.insert(condition.condition_id.as_str()) {
                errors.push(format!(
                    "rule '{}': duplicate conditionId '{}'",
                    self.rule_id, condition.condition_id
                ));
            }
        }

        for reward in &self.rewards {
            if reward.reward_id.trim().is_empty() {
                errors.push(format!("rule '{}': rewardId must be non-empty", self.rule_id));
            }
            match reward.reward_type {
                RewardType::Points => {
                    if reward.target_id.is_none() {
                        errors.push(format!(
                            "rule '{}': points reward '{}' requires targetId",
                            self.rule_id, reward.reward_id
                        ));
                    }
                    if reward.amount.is_none() {
                        errors.push(format!(
                            "rule '{}': points reward '{}' requires amount",
                            self.rule_id, reward.reward_id
                        ));
                    }
                }
                RewardType::Badge | RewardType::Trophy => {
                    if reward.target_id.is_none() {
                        errors.push(format!(
                            "rule '{}': {:?} reward '{}' requires targetId",
                            self.rule_id, reward.reward_type, reward.reward_id
                        ));
                    }
                }
                // Level rewards are computed from the balance, not fixed.
                RewardType::Level => {
                    if reward.target_id.is_none() {
                        errors.push(format!(
                            "rule '{}': level reward '{}' requires targetId (point category)",
                            self.rule_id, reward.reward_id
                        ));
                    }
                }
            }
        }

        for spending in &self.spendings {
            if spending.category.trim().is_empty() {
                errors.push(format!(
                    "rule '{}': spending '{}' requires category",
                    self.rule_id, spending.spending_id
                ));
            }
            let required: &[&str] = match spending.spending_type {
                SpendingType::Transaction => &["amount"],
                SpendingType::Transfer => &["source", "destination", "amount"],
            };
            for key in required {
                if !spending.attributes.contains_key(*key) {
                    errors.push(format!(
                        "rule '{}': {:?} spending '{}' requires attribute '{}'",
                        self.rule_id, spending.spending_type, spending.spending_id, key
                    ));
                }
            }
        }

        errors
    }
}

/// Resolve a parameter value against the trigger event: strings of the form
/// `"attr:name"` read `event.attributes["name"]`; anything else is a literal.
pub fn resolve_value<'a>(value: &'a Value, event: &'a GameEvent) -> Option<&'a Value> {
    if let Some(text) = value.as_str() {
        if let Some(attribute) = text.strip_prefix("attr:") {
            return event.attribute(attribute);
        }
    }
    Some(value)
}

/// Resolve a parameter to a signed integer amount. Floats truncate toward
/// zero; numeric strings parse.
pub fn resolve_amount(value: &Value, event: &GameEvent) -> Option<i64> {
    let resolved = resolve_value(value, event)?;
    if let Some(n) = resolved.as_i64() {
        return Some(n);
    }
    if let Some(f) = resolved.as_f64() {
        return Some(f as i64);
    }
    resolved.as_str().and_then(|s| s.parse().ok())
}

/// Resolve a parameter to a string, e.g. a user id in a transfer spending.
pub fn resolve_string(value: &Value, event: &GameEvent) -> Option<String> {
    let resolved = resolve_value(value, event)?;
    match resolved {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
