//! Dry-run service: evaluate a candidate event without storing or executing
//!
//! Dry-run shares the `RuleEngine` code path with the live pipeline, reads
//! the same catalog snapshot and user history at call time, and mutates
//! nothing, so its trace is structurally identical to what live processing
//! would produce for the same inputs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogService;
use crate::engine::{RuleEngine, RuleEvaluation};
use crate::error::Result;
use crate::models::EventDocument;

/// Wire response of the dry-run endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResponse {
    pub trigger_event_id: String,
    pub user_id: String,
    pub event_type: String,
    pub rules: Vec<RuleEvaluation>,
    pub summary: DryRunSummary,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunSummary {
    pub total_rules_evaluated: usize,
    pub rules_that_would_execute: usize,
    pub total_predicted_rewards: usize,
    pub total_evaluation_time_ms: u64,
    pub event_valid: bool,
    pub validation_errors: Vec<String>,
}

/// Runs the rule engine in trace mode against candidate events.
pub struct DryRunService {
    catalog: Arc<CatalogService>,
    engine: Arc<RuleEngine>,
}

impl DryRunService {
    pub fn new(catalog: Arc<CatalogService>, engine: Arc<RuleEngine>) -> Self {
        Self { catalog, engine }
    }

    /// Evaluate a candidate event document. The event is neither stored nor
    /// enqueued; an invalid document still yields a response with the
    /// validation errors in the summary.
    pub async fn dry_run(&self, document: EventDocument) -> Result<DryRunResponse> {
        let user_id = document.user_id.clone();
        let event_type = document.event_type.clone();
        let now = Utc::now();

        let (event, mut validation_errors) = match document.into_event(now) {
            Ok(event) => (Some(event), Vec::new()),
            Err(errors) => (None, errors),
        };

        if let Some(event) = &event {
            let snapshot = self.catalog.snapshot();
            if let Some(definition) = snapshot.event_definition(&event.event_type) {
                validation_errors.extend(definition.validate_payload(event));
            }
        }

        let event_valid = validation_errors.is_empty();
        let rules = match (&event, event_valid) {
            (Some(event), true) => self.engine.evaluate(event).await?.rules,
            _ => Vec::new(),
        };

        let rules_that_would_execute = rules.iter().filter(|r| r.would_execute).count();
        let total_predicted_rewards = rules
            .iter()
            .filter(|r| r.would_execute)
            .map(|r| r.predicted_rewards.len() + r.predicted_spendings.len())
            .sum();
        let total_evaluation_time_ms = rules.iter().map(|r| r.evaluation_time_ms).sum();

        Ok(DryRunResponse {
            trigger_event_id: event
                .as_ref()
                .map(|e| e.event_id.clone())
                .unwrap_or_default(),
            user_id,
            event_type,
            summary: DryRunSummary {
                total_rules_evaluated: rules.len(),
                rules_that_would_execute,
                total_predicted_rewards,
                total_evaluation_time_ms,
                event_valid,
                validation_errors,
            },
            rules,
            evaluated_at: now,
        })
    }
}
