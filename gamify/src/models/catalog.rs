//! Catalog entity models: point categories, badges, trophies, levels

use serde::{Deserialize, Serialize};

/// How a point category folds transactions into a balance. Fixed for the
/// lifetime of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregation {
    Sum,
    Max,
}

/// A named pool of points, e.g. `xp` or `coins`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointCategory {
    pub id: String,
    pub name: String,
    pub aggregation: Aggregation,
    /// Balances may drop below zero.
    pub allow_negative: bool,
    /// Points in this category can back spendings and transfers.
    pub allow_spend: bool,
}

impl PointCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aggregation: Aggregation::Sum,
            allow_negative: false,
            allow_spend: true,
        }
    }
}

/// A one-time achievement granted to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub visible: bool,
}

/// Trophies are badges with their own id space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trophy {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub visible: bool,
}

/// A threshold on a point-category balance. For each category a user
/// qualifies for the level with the largest `min_points <= balance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: String,
    pub name: String,
    pub category: String,
    pub min_points: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_category_defaults() {
        let category = PointCategory::new("xp", "Experience");
        assert_eq!(category.aggregation, Aggregation::Sum);
        assert!(!category.allow_negative);
        assert!(category.allow_spend);
    }

    #[test]
    fn level_serializes_camel_case() {
        let level = Level {
            id: "silver".to_string(),
            name: "Silver".to_string(),
            category: "xp".to_string(),
            min_points: 100,
        };
        let json = serde_json::to_value(&level).unwrap();
        assert_eq!(json["minPoints"], 100);
    }
}
