//! Catalog: the read-mostly registry of definitions, categories, badges,
//! trophies, levels, and rules
//!
//! Workers read an immutable snapshot; updates build a new snapshot and swap
//! it in atomically. An event in flight keeps evaluating against the
//! snapshot it captured at dequeue time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{EngineError, Result};
use crate::models::{Badge, EventDefinition, Level, PointCategory, Rule, Trophy};

/// Immutable view of the catalog at a point in time.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    event_definitions: HashMap<String, EventDefinition>,
    point_categories: HashMap<String, PointCategory>,
    badges: HashMap<String, Badge>,
    trophies: HashMap<String, Trophy>,
    /// Per category, ascending by `min_points`.
    levels_by_category: HashMap<String, Vec<Level>>,
    /// Stable catalog order: sorted by `rule_id`.
    rules: Vec<Rule>,
}

impl CatalogSnapshot {
    pub fn event_definition(&self, event_type: &str) -> Option<&EventDefinition> {
        self.event_definitions.get(event_type)
    }

    pub fn point_category(&self, id: &str) -> Option<&PointCategory> {
        self.point_categories.get(id)
    }

    pub fn badge(&self, id: &str) -> Option<&Badge> {
        self.badges.get(id)
    }

    pub fn trophy(&self, id: &str) -> Option<&Trophy> {
        self.trophies.get(id)
    }

    /// Levels for a category, ascending by threshold.
    pub fn levels_for(&self, category: &str) -> &[Level] {
        self.levels_by_category
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The level with the largest `min_points <= balance`, if any.
    pub fn qualifying_level(&self, category: &str, balance: i64) -> Option<&Level> {
        self.levels_for(category)
            .iter()
            .rev()
            .find(|level| level.min_points <= balance)
    }

    /// Active rules in catalog order.
    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_active)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Accumulates catalog entities and validates them into a snapshot.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    event_definitions: Vec<EventDefinition>,
    point_categories: Vec<PointCategory>,
    badges: Vec<Badge>,
    trophies: Vec<Trophy>,
    levels: Vec<Level>,
    rules: Vec<Rule>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_definition(mut self, definition: EventDefinition) -> Self {
        self.event_definitions.push(definition);
        self
    }

    pub fn point_category(mut self, category: PointCategory) -> Self {
        self.point_categories.push(category);
        self
    }

    pub fn badge(mut self, badge: Badge) -> Self {
        self.badges.push(badge);
        self
    }

    pub fn trophy(mut self, trophy: Trophy) -> Self {
        self.trophies.push(trophy);
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.levels.push(level);
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validate everything and produce a snapshot. Rule well-formedness and
    /// referential integrity failures reject the whole build.
    pub fn build(self) -> Result<CatalogSnapshot> {
        let mut errors = Vec::new();

        let point_categories: HashMap<String, PointCategory> = self
            .point_categories
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let badges: HashMap<String, Badge> =
            self.badges.into_iter().map(|b| (b.id.clone(), b)).collect();
        let trophies: HashMap<String, Trophy> =
            self.trophies.into_iter().map(|t| (t.id.clone(), t)).collect();

        let mut levels_by_category: HashMap<String, Vec<Level>> = HashMap::new();
        for level in self.levels {
            if level.min_points < 0 {
                errors.push(format!("level '{}': minPoints must be >= 0", level.id));
            }
            if !point_categories.contains_key(&level.category) {
                errors.push(format!(
                    "level '{}': unknown point category '{}'",
                    level.id, level.category
                ));
            }
            levels_by_category
                .entry(level.category.clone())
                .or_default()
                .push(level);
        }
        for levels in levels_by_category.values_mut() {
            levels.sort_by_key(|l| l.min_points);
        }

        let mut rules = self.rules;
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        let mut seen_rule_ids = std::collections::HashSet::new();
        for rule in &rules {
            errors.extend(rule.validate());
            if !seen_rule_ids.insert(rule.rule_id.clone()) {
                errors.push(format!("duplicate ruleId '{}'", rule.rule_id));
            }
            for reward in &rule.rewards {
                let target = reward.target_id.as_deref();
                let missing = match reward.reward_type {
                    crate::models::RewardType::Points | crate::models::RewardType::Level => target
                        .map(|t| !point_categories.contains_key(t))
                        .unwrap_or(false),
                    crate::models::RewardType::Badge => {
                        target.map(|t| !badges.contains_key(t)).unwrap_or(false)
                    }
                    crate::models::RewardType::Trophy => {
                        target.map(|t| !trophies.contains_key(t)).unwrap_or(false)
                    }
                };
                if missing {
                    errors.push(format!(
                        "rule '{}': reward '{}' references unknown target '{}'",
                        rule.rule_id,
                        reward.reward_id,
                        target.unwrap_or("")
                    ));
                }
            }
            for spending in &rule.spendings {
                if !point_categories.contains_key(&spending.category) {
                    errors.push(format!(
                        "rule '{}': spending '{}' references unknown category '{}'",
                        rule.rule_id, spending.spending_id, spending.category
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(EngineError::InvalidCatalog(errors));
        }

        Ok(CatalogSnapshot {
            event_definitions: self
                .event_definitions
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
            point_categories,
            badges,
            trophies,
            levels_by_category,
            rules,
        })
    }
}

/// Shared catalog handle. Reads clone an `Arc` to the current snapshot;
/// installs replace it atomically.
#[derive(Debug)]
pub struct CatalogService {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl CatalogService {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn empty() -> Self {
        Self::new(CatalogSnapshot::default())
    }

    /// The current snapshot. Holders keep reading a consistent catalog even
    /// across a concurrent install.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.read().unwrap().clone()
    }

    /// Validate and atomically swap in a new snapshot. On failure the
    /// previous snapshot stays live.
    pub fn install(&self, builder: CatalogBuilder) -> Result<()> {
        let snapshot = builder.build()?;
        *self.current.write().unwrap() = Arc::new(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::{ConditionSpec, RewardSpec};
    use crate::models::{ConditionLogic, ConditionType, RewardType};
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn rule_with_reward(rule_id: &str, reward_type: RewardType, target: &str) -> Rule {
        Rule {
            rule_id: rule_id.to_string(),
            name: "test".to_string(),
            description: None,
            triggers: vec!["LOGIN".to_string()],
            condition_logic: ConditionLogic::And,
            conditions: vec![ConditionSpec {
                condition_id: "c1".to_string(),
                condition_type: ConditionType::AlwaysTrue,
                parameters: StdHashMap::new(),
            }],
            rewards: vec![RewardSpec {
                reward_id: "rw1".to_string(),
                reward_type,
                target_id: Some(target.to_string()),
                amount: matches!(reward_type, RewardType::Points).then(|| serde_json::json!(10)),
            }],
            spendings: Vec::new(),
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn qualifying_level_picks_largest_threshold() {
        let snapshot = CatalogBuilder::new()
            .point_category(PointCategory::new("xp", "Experience"))
            .level(Level {
                id: "gold".to_string(),
                name: "Gold".to_string(),
                category: "xp".to_string(),
                min_points: 500,
            })
            .level(Level {
                id: "bronze".to_string(),
                name: "Bronze".to_string(),
                category: "xp".to_string(),
                min_points: 0,
            })
            .level(Level {
                id: "silver".to_string(),
                name: "Silver".to_string(),
                category: "xp".to_string(),
                min_points: 100,
            })
            .build()
            .unwrap();

        assert_eq!(snapshot.qualifying_level("xp", 99).unwrap().id, "bronze");
        // Balance exactly at a threshold qualifies.
        assert_eq!(snapshot.qualifying_level("xp", 100).unwrap().id, "silver");
        assert_eq!(snapshot.qualifying_level("xp", 5000).unwrap().id, "gold");
        assert!(snapshot.qualifying_level("coins", 100).is_none());
    }

    #[test]
    fn install_rejects_dangling_reward_references() {
        let result = CatalogBuilder::new()
            .rule(rule_with_reward("r1", RewardType::Badge, "badge-missing"))
            .build();
        match result {
            Err(EngineError::InvalidCatalog(errors)) => {
                assert!(errors.iter().any(|e| e.contains("badge-missing")));
            }
            other => panic!("expected InvalidCatalog, got {:?}", other),
        }
    }

    #[test]
    fn install_swaps_snapshot_atomically() {
        let service = CatalogService::empty();
        let before = service.snapshot();
        assert_eq!(before.rules().len(), 0);

        service
            .install(
                CatalogBuilder::new()
                    .point_category(PointCategory::new("xp", "Experience"))
                    .rule(rule_with_reward("r1", RewardType::Points, "xp")),
            )
            .unwrap();

        // The old handle still sees the old snapshot; new reads see the new.
        assert_eq!(before.rules().len(), 0);
        assert_eq!(service.snapshot().rules().len(), 1);
    }

    #[test]
    fn failed_install_keeps_previous_snapshot() {
        let service = CatalogService::empty();
        service
            .install(
                CatalogBuilder::new()
                    .point_category(PointCategory::new("xp", "Experience"))
                    .rule(rule_with_reward("r1", RewardType::Points, "xp")),
            )
            .unwrap();

        let result = service.install(
            CatalogBuilder::new().rule(rule_with_reward("r2", RewardType::Trophy, "nope")),
        );
        assert!(result.is_err());
        assert_eq!(service.snapshot().rules().len(), 1);
    }

    #[test]
    fn rules_ordered_by_rule_id() {
        let snapshot = CatalogBuilder::new()
            .point_category(PointCategory::new("xp", "Experience"))
            .rule(rule_with_reward("r2", RewardType::Points, "xp"))
            .rule(rule_with_reward("r1", RewardType::Points, "xp"))
            .build()
            .unwrap();
        let ids: Vec<_> = snapshot.rules().iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }
}
