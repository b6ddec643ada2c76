//! Rule engine: selects rules for a trigger event, evaluates their
//! conditions, and produces a materialization plan
//!
//! The engine is deterministic given the same event, history, and catalog
//! snapshot, and it is the single code path behind both live processing and
//! dry-run, which keeps the two observationally equivalent.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::CatalogService;
use crate::conditions::{evaluate, ConditionTrace, EvalContext};
use crate::error::Result;
use crate::models::rule::{resolve_amount, resolve_string};
use crate::models::{ConditionLogic, GameEvent, RewardSpec, RewardType, SpendingSpec, SpendingType};
use crate::storage::EventStore;

/// A reward a rule would materialize, with amounts resolved against the
/// trigger event where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedReward {
    pub reward_id: String,
    #[serde(rename = "type")]
    pub reward_type: RewardType,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

/// A spending a rule would materialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedSpending {
    pub spending_id: String,
    #[serde(rename = "type")]
    pub spending_type: SpendingType,
    pub category: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

/// Per-rule evaluation record; doubles as the wire `RuleTrace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_matched: bool,
    pub conditions: Vec<ConditionTrace>,
    pub predicted_rewards: Vec<PredictedReward>,
    pub predicted_spendings: Vec<PredictedSpending>,
    pub would_execute: bool,
    pub evaluation_time_ms: u64,
    #[serde(default)]
    pub degraded: bool,
}

/// One step of a plan, tagged with the rule that produced it.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub rule_id: String,
    pub action: PlanAction,
}

#[derive(Debug, Clone)]
pub enum PlanAction {
    Reward(RewardSpec),
    Spending(SpendingSpec),
}

/// The ordered list of reward and spending intents for a single event.
/// Rules contribute in catalog order; within a rule, rewards precede
/// spendings, each in declared order.
#[derive(Debug, Clone, Default)]
pub struct MaterializationPlan {
    pub event_id: String,
    pub user_id: String,
    pub rule_ids: Vec<String>,
    pub steps: Vec<PlanStep>,
}

impl MaterializationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Everything one evaluation produced: the full trace and the plan.
#[derive(Debug, Clone)]
pub struct EngineEvaluation {
    pub rules: Vec<RuleEvaluation>,
    pub plan: MaterializationPlan,
}

/// Stateless orchestrator over the catalog and the event store.
pub struct RuleEngine {
    catalog: Arc<CatalogService>,
    events: Arc<dyn EventStore>,
    max_eval_ms: u64,
}

impl RuleEngine {
    pub fn new(catalog: Arc<CatalogService>, events: Arc<dyn EventStore>, max_eval_ms: u64) -> Self {
        Self {
            catalog,
            events,
            max_eval_ms,
        }
    }

    /// Evaluate every active rule against the trigger and build the plan.
    pub async fn evaluate(&self, trigger: &GameEvent) -> Result<EngineEvaluation> {
        let snapshot = self.catalog.snapshot();
        let history = self.events.events_for_user(&trigger.user_id).await?;

        let mut rules = Vec::new();
        let mut plan = MaterializationPlan {
            event_id: trigger.event_id.clone(),
            user_id: trigger.user_id.clone(),
            ..Default::default()
        };

        for rule in snapshot.active_rules() {
            let started = Instant::now();
            let trigger_matched = rule.matches_trigger(trigger);

            let mut conditions: Vec<ConditionTrace> = Vec::new();
            let mut would_execute = false;
            if trigger_matched {
                let ctx = EvalContext::new(trigger, &history);
                would_execute = match rule.condition_logic {
                    ConditionLogic::And => {
                        let mut all = true;
                        for spec in &rule.conditions {
                            if !all {
                                conditions.push(ConditionTrace::skipped(spec));
                                continue;
                            }
                            let trace = evaluate(spec, &ctx);
                            all = trace.result;
                            conditions.push(trace);
                        }
                        all
                    }
                    ConditionLogic::Or => {
                        let mut any = false;
                        for spec in &rule.conditions {
                            if any {
                                conditions.push(ConditionTrace::skipped(spec));
                                continue;
                            }
                            let trace = evaluate(spec, &ctx);
                            any = trace.result;
                            conditions.push(trace);
                        }
                        any
                    }
                };
            }

            let predicted_rewards = if trigger_matched {
                rule.rewards
                    .iter()
                    .map(|reward| predict_reward(reward, trigger))
                    .collect()
            } else {
                Vec::new()
            };
            let predicted_spendings = if trigger_matched {
                rule.spendings
                    .iter()
                    .map(|spending| predict_spending(spending, trigger))
                    .collect()
            } else {
                Vec::new()
            };

            if would_execute {
                plan.rule_ids.push(rule.rule_id.clone());
                for reward in &rule.rewards {
                    plan.steps.push(PlanStep {
                        rule_id: rule.rule_id.clone(),
                        action: PlanAction::Reward(reward.clone()),
                    });
                }
                for spending in &rule.spendings {
                    plan.steps.push(PlanStep {
                        rule_id: rule.rule_id.clone(),
                        action: PlanAction::Spending(spending.clone()),
                    });
                }
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            let degraded = elapsed_ms > self.max_eval_ms;
            if degraded {
                warn!(
                    rule_id = %rule.rule_id,
                    elapsed_ms,
                    budget_ms = self.max_eval_ms,
                    "rule evaluation exceeded its time budget"
                );
            }

            rules.push(RuleEvaluation {
                rule_id: rule.rule_id.clone(),
                name: rule.name.clone(),
                description: rule.description.clone(),
                trigger_matched,
                conditions,
                predicted_rewards,
                predicted_spendings,
                would_execute,
                evaluation_time_ms: elapsed_ms,
                degraded,
            });
        }

        Ok(EngineEvaluation { rules, plan })
    }
}

fn predict_reward(reward: &RewardSpec, trigger: &GameEvent) -> PredictedReward {
    PredictedReward {
        reward_id: reward.reward_id.clone(),
        reward_type: reward.reward_type,
        target_id: reward.target_id.clone(),
        amount: reward
            .amount
            .as_ref()
            .and_then(|value| resolve_amount(value, trigger)),
    }
}

fn predict_spending(spending: &SpendingSpec, trigger: &GameEvent) -> PredictedSpending {
    let resolve = |key: &str| {
        spending
            .attributes
            .get(key)
            .and_then(|value| resolve_string(value, trigger))
    };
    PredictedSpending {
        spending_id: spending.spending_id.clone(),
        spending_type: spending.spending_type,
        category: spending.category.clone(),
        amount: spending
            .attributes
            .get("amount")
            .and_then(|value| resolve_amount(value, trigger)),
        source: resolve("source"),
        destination: resolve("destination"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::models::rule::{ConditionSpec, Rule};
    use crate::models::{ConditionType, PointCategory};
    use crate::storage::InMemoryEventStore;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn trigger(event_type: &str, attributes: serde_json::Value) -> GameEvent {
        GameEvent {
            event_id: "e1".to_string(),
            event_type: event_type.to_string(),
            user_id: "u1".to_string(),
            occurred_at: Utc::now(),
            attributes: serde_json::from_value(attributes).unwrap(),
            cascade_depth: 0,
        }
    }

    fn points_rule(rule_id: &str, trigger_type: &str, conditions: Vec<ConditionSpec>) -> Rule {
        Rule {
            rule_id: rule_id.to_string(),
            name: format!("rule {}", rule_id),
            description: None,
            triggers: vec![trigger_type.to_string()],
            condition_logic: ConditionLogic::And,
            conditions,
            rewards: vec![RewardSpec {
                reward_id: "rw1".to_string(),
                reward_type: RewardType::Points,
                target_id: Some("xp".to_string()),
                amount: Some(json!(100)),
            }],
            spendings: Vec::new(),
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    fn condition(id: &str, condition_type: ConditionType, parameters: serde_json::Value) -> ConditionSpec {
        ConditionSpec {
            condition_id: id.to_string(),
            condition_type,
            parameters: serde_json::from_value(parameters).unwrap(),
        }
    }

    fn engine_with(rules: Vec<Rule>) -> RuleEngine {
        let mut builder = CatalogBuilder::new().point_category(PointCategory::new("xp", "XP"));
        for rule in rules {
            builder = builder.rule(rule);
        }
        let catalog = Arc::new(CatalogService::empty());
        catalog.install(builder).unwrap();
        RuleEngine::new(catalog, Arc::new(InMemoryEventStore::new()), 250)
    }

    #[tokio::test]
    async fn threshold_gate_blocks_and_admits() {
        let engine = engine_with(vec![points_rule(
            "r1",
            "USER_PURCHASED_PRODUCT",
            vec![condition(
                "c1",
                ConditionType::Threshold,
                json!({"attribute": "amount", "operator": "ge", "value": 50}),
            )],
        )]);

        let below = engine
            .evaluate(&trigger("USER_PURCHASED_PRODUCT", json!({"amount": 49})))
            .await
            .unwrap();
        assert!(!below.rules[0].would_execute);
        assert!(below.plan.is_empty());

        let at = engine
            .evaluate(&trigger("USER_PURCHASED_PRODUCT", json!({"amount": 50})))
            .await
            .unwrap();
        assert!(at.rules[0].would_execute);
        assert_eq!(at.plan.steps.len(), 1);
        assert_eq!(at.rules[0].predicted_rewards[0].amount, Some(100));
    }

    #[tokio::test]
    async fn trigger_match_is_case_insensitive() {
        let engine = engine_with(vec![points_rule(
            "r1",
            "USER_COMMENTED",
            vec![condition("c1", ConditionType::AlwaysTrue, json!({}))],
        )]);
        let result = engine
            .evaluate(&trigger("user_commented", json!({})))
            .await
            .unwrap();
        assert!(result.rules[0].trigger_matched);
        assert!(result.rules[0].would_execute);
    }

    #[tokio::test]
    async fn and_short_circuit_emits_skipped_traces() {
        let engine = engine_with(vec![points_rule(
            "r1",
            "LOGIN",
            vec![
                condition("c1", ConditionType::CustomScript, json!({})),
                condition("c2", ConditionType::AlwaysTrue, json!({})),
            ],
        )]);
        let result = engine.evaluate(&trigger("LOGIN", json!({}))).await.unwrap();
        let traces = &result.rules[0].conditions;
        assert_eq!(traces.len(), 2);
        assert!(!traces[0].result);
        assert_eq!(traces[1].details, "skipped");
        assert!(!result.rules[0].would_execute);
    }

    #[tokio::test]
    async fn or_logic_executes_on_any_true() {
        let mut rule = points_rule(
            "r1",
            "LOGIN",
            vec![
                condition("c1", ConditionType::CustomScript, json!({})),
                condition("c2", ConditionType::AlwaysTrue, json!({})),
                condition("c3", ConditionType::CustomScript, json!({})),
            ],
        );
        rule.condition_logic = ConditionLogic::Or;
        let engine = engine_with(vec![rule]);

        let result = engine.evaluate(&trigger("LOGIN", json!({}))).await.unwrap();
        let evaluation = &result.rules[0];
        assert!(evaluation.would_execute);
        assert_eq!(evaluation.conditions[2].details, "skipped");
    }

    #[tokio::test]
    async fn rules_apply_in_catalog_order() {
        let engine = engine_with(vec![
            points_rule("r2", "LOGIN", vec![condition("c1", ConditionType::AlwaysTrue, json!({}))]),
            points_rule("r1", "LOGIN", vec![condition("c1", ConditionType::AlwaysTrue, json!({}))]),
        ]);
        let result = engine.evaluate(&trigger("LOGIN", json!({}))).await.unwrap();
        assert_eq!(result.plan.rule_ids, vec!["r1", "r2"]);
        let order: Vec<&str> = result.rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(order, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn inactive_rules_are_not_evaluated() {
        let mut rule = points_rule(
            "r1",
            "LOGIN",
            vec![condition("c1", ConditionType::AlwaysTrue, json!({}))],
        );
        rule.is_active = false;
        let engine = engine_with(vec![rule]);
        let result = engine.evaluate(&trigger("LOGIN", json!({}))).await.unwrap();
        assert!(result.rules.is_empty());
        assert!(result.plan.is_empty());
    }

    #[tokio::test]
    async fn non_matching_trigger_records_trace_without_conditions() {
        let engine = engine_with(vec![points_rule(
            "r1",
            "USER_COMMENTED",
            vec![condition("c1", ConditionType::AlwaysTrue, json!({}))],
        )]);
        let result = engine.evaluate(&trigger("LOGIN", json!({}))).await.unwrap();
        let evaluation = &result.rules[0];
        assert!(!evaluation.trigger_matched);
        assert!(evaluation.conditions.is_empty());
        assert!(!evaluation.would_execute);
    }
}
