//! Condition evaluator
//!
//! Each condition is a pure function of the trigger event and a slice of the
//! user's history. Evaluation never fails: bad parameters, missing
//! attributes, and unsupported variants all fold into `result = false` with
//! an explanatory detail string, captured in a structured trace.
//!
//! The trigger is excluded from the history scan by id and accounted for
//! explicitly, so the live pipeline (which stores the trigger before
//! processing) and dry-run (which never stores it) evaluate identically.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ConditionSpec, ConditionType, GameEvent};

/// Structured record of a single condition evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionTrace {
    pub condition_id: String,
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub parameters: HashMap<String, Value>,
    pub result: bool,
    pub details: String,
    pub evaluation_time_ms: u64,
}

impl ConditionTrace {
    /// Trace emitted for conditions short-circuiting skipped.
    pub fn skipped(spec: &ConditionSpec) -> Self {
        Self {
            condition_id: spec.condition_id.clone(),
            condition_type: spec.condition_type,
            parameters: spec.parameters.clone(),
            result: false,
            details: "skipped".to_string(),
            evaluation_time_ms: 0,
        }
    }
}

/// Inputs for one evaluation: the trigger and the user's events ascending by
/// `occurredAt`. The slice may or may not contain the trigger itself.
pub struct EvalContext<'a> {
    pub trigger: &'a GameEvent,
    pub history: &'a [GameEvent],
}

impl<'a> EvalContext<'a> {
    pub fn new(trigger: &'a GameEvent, history: &'a [GameEvent]) -> Self {
        Self { trigger, history }
    }

    /// History without the trigger event itself.
    fn prior_and_concurrent(&self) -> impl Iterator<Item = &GameEvent> {
        let trigger_id = &self.trigger.event_id;
        self.history.iter().filter(move |e| &e.event_id != trigger_id)
    }
}

/// Evaluate one condition against the context, producing its trace.
pub fn evaluate(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> ConditionTrace {
    let started = Instant::now();
    let (result, details) = match spec.condition_type {
        ConditionType::AlwaysTrue => (true, "always true".to_string()),
        ConditionType::AttributeEquals => attribute_equals(spec, ctx),
        ConditionType::Count => count(spec, ctx),
        ConditionType::Threshold => threshold(spec, ctx),
        ConditionType::Sequence => sequence(spec, ctx),
        ConditionType::TimeSinceLastEvent => time_since_last_event(spec, ctx),
        ConditionType::FirstOccurrence => first_occurrence(spec, ctx),
        ConditionType::CustomScript => (false, "unsupported".to_string()),
    };

    ConditionTrace {
        condition_id: spec.condition_id.clone(),
        condition_type: spec.condition_type,
        parameters: spec.parameters.clone(),
        result,
        details,
        evaluation_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn attribute_equals(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> (bool, String) {
    let Some(attribute) = str_param(spec, "attribute") else {
        return (false, "parameter 'attribute' missing".to_string());
    };
    let Some(expected) = spec.parameters.get("value") else {
        return (false, "parameter 'value' missing".to_string());
    };
    let Some(actual) = ctx.trigger.attribute(attribute) else {
        return (false, format!("attribute missing: '{}'", attribute));
    };

    let equal = values_equal(actual, expected);
    (
        equal,
        format!(
            "attribute '{}' = {} vs expected {}",
            attribute, actual, expected
        ),
    )
}

fn count(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> (bool, String) {
    let Some(event_type) = str_param(spec, "eventType") else {
        return (false, "parameter 'eventType' missing".to_string());
    };
    let Some(min_count) = int_param(spec, "minCount") else {
        return (false, "parameter 'minCount' missing".to_string());
    };
    let max_count = int_param(spec, "maxCount");
    let window = int_param(spec, "timeWindow").map(Duration::minutes);

    let end = ctx.trigger.occurred_at;
    let start = window.map(|w| end - w);

    let mut total: i64 = ctx
        .prior_and_concurrent()
        .filter(|e| e.is_type(event_type))
        .filter(|e| e.occurred_at <= end)
        .filter(|e| start.map(|s| e.occurred_at >= s).unwrap_or(true))
        .count() as i64;
    // The trigger counts toward its own window.
    if ctx.trigger.is_type(event_type) {
        total += 1;
    }

    let in_range = total >= min_count && max_count.map(|m| total <= m).unwrap_or(true);
    let range = match max_count {
        Some(m) => format!("[{}, {}]", min_count, m),
        None => format!("[{}, ∞)", min_count),
    };
    let window_note = window
        .map(|w| format!(" within {} minutes", w.num_minutes()))
        .unwrap_or_default();
    (
        in_range,
        format!(
            "count of '{}'{} = {}, required {}",
            event_type, window_note, total, range
        ),
    )
}

fn threshold(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> (bool, String) {
    let Some(attribute) = str_param(spec, "attribute") else {
        return (false, "parameter 'attribute' missing".to_string());
    };
    let Some(operator) = str_param(spec, "operator") else {
        return (false, "parameter 'operator' missing".to_string());
    };
    let Some(expected) = spec.parameters.get("value").and_then(as_number) else {
        return (false, "parameter 'value' missing or not numeric".to_string());
    };
    let Some(raw) = ctx.trigger.attribute(attribute) else {
        return (false, format!("attribute missing: '{}'", attribute));
    };
    let Some(actual) = as_number(raw) else {
        return (false, format!("attribute '{}' is not numeric", attribute));
    };

    let result = match operator {
        "lt" => actual < expected,
        "le" => actual <= expected,
        "eq" => actual == expected,
        "ne" => actual != expected,
        "ge" => actual >= expected,
        "gt" => actual > expected,
        other => {
            return (false, format!("unknown operator '{}'", other));
        }
    };
    (
        result,
        format!("{} {} {} on '{}'", actual, operator, expected, attribute),
    )
}

fn sequence(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> (bool, String) {
    let Some(expected) = spec.parameters.get("events").and_then(Value::as_array) else {
        return (false, "parameter 'events' missing".to_string());
    };
    let expected: Vec<&str> = expected.iter().filter_map(Value::as_str).collect();
    if expected.is_empty() {
        return (false, "parameter 'events' is empty".to_string());
    }
    let window = int_param(spec, "timeWindow").map(Duration::minutes);

    // The user's most recent n events up to and including the trigger.
    let mut recent: Vec<&GameEvent> = ctx
        .prior_and_concurrent()
        .filter(|e| e.occurred_at <= ctx.trigger.occurred_at)
        .collect();
    recent.push(ctx.trigger);
    if recent.len() < expected.len() {
        return (
            false,
            format!(
                "only {} events on record, sequence needs {}",
                recent.len(),
                expected.len()
            ),
        );
    }
    let tail = &recent[recent.len() - expected.len()..];

    let matches = tail
        .iter()
        .zip(expected.iter())
        .all(|(event, wanted)| event.is_type(wanted));
    if !matches {
        let got: Vec<&str> = tail.iter().map(|e| e.event_type.as_str()).collect();
        return (
            false,
            format!("recent events {:?} do not match {:?}", got, expected),
        );
    }

    if let Some(window) = window {
        let first = tail.first().expect("sequence is non-empty");
        let last = tail.last().expect("sequence is non-empty");
        if last.occurred_at - first.occurred_at > window {
            return (
                false,
                format!(
                    "sequence matched but spans more than {} minutes",
                    window.num_minutes()
                ),
            );
        }
    }

    (true, format!("most recent {} events match", expected.len()))
}

fn time_since_last_event(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> (bool, String) {
    let Some(event_type) = str_param(spec, "eventType") else {
        return (false, "parameter 'eventType' missing".to_string());
    };
    let Some(min_minutes) = int_param(spec, "minMinutes") else {
        return (false, "parameter 'minMinutes' missing".to_string());
    };

    let end = ctx.trigger.occurred_at;
    let start = end - Duration::minutes(min_minutes);

    // Both bounds exclusive; the trigger itself does not count.
    let recent = ctx
        .prior_and_concurrent()
        .filter(|e| e.is_type(event_type))
        .filter(|e| e.occurred_at > start && e.occurred_at < end)
        .count();

    if recent > 0 {
        (
            false,
            format!(
                "{} event(s) of '{}' within the last {} minutes",
                recent, event_type, min_minutes
            ),
        )
    } else {
        (
            true,
            format!("no '{}' event within the last {} minutes", event_type, min_minutes),
        )
    }
}

fn first_occurrence(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> (bool, String) {
    let Some(event_type) = str_param(spec, "eventType") else {
        return (false, "parameter 'eventType' missing".to_string());
    };

    let prior = ctx
        .prior_and_concurrent()
        .filter(|e| e.is_type(event_type))
        .filter(|e| e.occurred_at < ctx.trigger.occurred_at)
        .count();

    if prior == 0 {
        (true, format!("no prior '{}' event", event_type))
    } else {
        (false, format!("{} prior '{}' event(s)", prior, event_type))
    }
}

fn str_param<'a>(spec: &'a ConditionSpec, name: &str) -> Option<&'a str> {
    spec.parameters.get(name).and_then(Value::as_str)
}

fn int_param(spec: &ConditionSpec, name: &str) -> Option<i64> {
    spec.parameters.get(name).and_then(as_number).map(|n| n as i64)
}

/// Numbers (and numeric strings) as f64 for comparisons.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Equality with numeric coercion: numeric values compare by value,
/// everything else by string form.
fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text(a) == text(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    fn event_at(id: &str, event_type: &str, occurred_at: DateTime<Utc>) -> GameEvent {
        GameEvent {
            event_id: id.to_string(),
            event_type: event_type.to_string(),
            user_id: "u1".to_string(),
            occurred_at,
            attributes: HashMap::new(),
            cascade_depth: 0,
        }
    }

    fn spec(condition_type: ConditionType, parameters: Value) -> ConditionSpec {
        ConditionSpec {
            condition_id: "c1".to_string(),
            condition_type,
            parameters: serde_json::from_value(parameters).unwrap(),
        }
    }

    #[test]
    fn always_true_holds() {
        let trigger = event_at("e1", "LOGIN", Utc::now());
        let trace = evaluate(&spec(ConditionType::AlwaysTrue, json!({})), &EvalContext::new(&trigger, &[]));
        assert!(trace.result);
    }

    #[test]
    fn attribute_equals_coerces_numbers() {
        let mut trigger = event_at("e1", "PURCHASE", Utc::now());
        trigger.attributes.insert("amount".to_string(), json!(50.0));

        let ctx = EvalContext::new(&trigger, &[]);
        let equal = evaluate(
            &spec(ConditionType::AttributeEquals, json!({"attribute": "amount", "value": 50})),
            &ctx,
        );
        assert!(equal.result);

        let unequal = evaluate(
            &spec(ConditionType::AttributeEquals, json!({"attribute": "amount", "value": 51})),
            &ctx,
        );
        assert!(!unequal.result);
    }

    #[test]
    fn attribute_equals_missing_attribute_is_false() {
        let trigger = event_at("e1", "PURCHASE", Utc::now());
        let trace = evaluate(
            &spec(ConditionType::AttributeEquals, json!({"attribute": "amount", "value": 50})),
            &EvalContext::new(&trigger, &[]),
        );
        assert!(!trace.result);
        assert!(trace.details.contains("attribute missing"));
    }

    #[test]
    fn count_includes_the_trigger() {
        let now = Utc::now();
        let trigger = event_at("e3", "USER_COMMENTED", now);
        // Zero prior events: the trigger alone satisfies minCount=1,maxCount=1.
        let trace = evaluate(
            &spec(
                ConditionType::Count,
                json!({"eventType": "USER_COMMENTED", "minCount": 1, "maxCount": 1}),
            ),
            &EvalContext::new(&trigger, &[]),
        );
        assert!(trace.result);

        // One prior event plus the trigger = 2, out of [1, 1].
        let history = vec![event_at("e1", "USER_COMMENTED", now - Duration::minutes(5))];
        let trace = evaluate(
            &spec(
                ConditionType::Count,
                json!({"eventType": "USER_COMMENTED", "minCount": 1, "maxCount": 1}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(!trace.result);
    }

    #[test]
    fn count_does_not_double_count_a_stored_trigger() {
        let now = Utc::now();
        let trigger = event_at("e2", "USER_COMMENTED", now);
        // The live pipeline stores the trigger before evaluation.
        let history = vec![
            event_at("e1", "USER_COMMENTED", now - Duration::minutes(5)),
            trigger.clone(),
        ];
        let trace = evaluate(
            &spec(ConditionType::Count, json!({"eventType": "USER_COMMENTED", "minCount": 2, "maxCount": 2})),
            &EvalContext::new(&trigger, &history),
        );
        assert!(trace.result, "{}", trace.details);
    }

    #[test]
    fn count_window_is_inclusive_at_the_boundary() {
        let now = Utc::now();
        let trigger = event_at("e2", "USER_COMMENTED", now);
        let history = vec![event_at("e1", "USER_COMMENTED", now - Duration::minutes(60))];
        let trace = evaluate(
            &spec(
                ConditionType::Count,
                json!({"eventType": "USER_COMMENTED", "minCount": 2, "timeWindow": 60}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(trace.result, "{}", trace.details);
    }

    #[test]
    fn threshold_operators() {
        let mut trigger = event_at("e1", "PURCHASE", Utc::now());
        trigger.attributes.insert("amount".to_string(), json!(50));
        let ctx = EvalContext::new(&trigger, &[]);

        for (operator, expected) in [("ge", true), ("gt", false), ("le", true), ("eq", true), ("ne", false), ("lt", false)] {
            let trace = evaluate(
                &spec(
                    ConditionType::Threshold,
                    json!({"attribute": "amount", "operator": operator, "value": 50}),
                ),
                &ctx,
            );
            assert_eq!(trace.result, expected, "operator {}", operator);
        }
    }

    #[test]
    fn threshold_missing_attribute_is_false_with_detail() {
        let trigger = event_at("e1", "PURCHASE", Utc::now());
        let trace = evaluate(
            &spec(
                ConditionType::Threshold,
                json!({"attribute": "amount", "operator": "ge", "value": 50}),
            ),
            &EvalContext::new(&trigger, &[]),
        );
        assert!(!trace.result);
        assert!(trace.details.contains("attribute missing"));
    }

    #[test]
    fn sequence_matches_only_most_recent_events() {
        let now = Utc::now();
        let trigger = event_at("e4", "CHECKOUT", now);
        let history = vec![
            event_at("e1", "BROWSE", now - Duration::minutes(30)),
            event_at("e2", "ADD_TO_CART", now - Duration::minutes(20)),
            event_at("e3", "BROWSE", now - Duration::minutes(10)),
        ];

        // The literal tail is BROWSE → CHECKOUT, not ADD_TO_CART → CHECKOUT.
        let miss = evaluate(
            &spec(ConditionType::Sequence, json!({"events": ["ADD_TO_CART", "CHECKOUT"]})),
            &EvalContext::new(&trigger, &history),
        );
        assert!(!miss.result);

        let hit = evaluate(
            &spec(ConditionType::Sequence, json!({"events": ["BROWSE", "CHECKOUT"]})),
            &EvalContext::new(&trigger, &history),
        );
        assert!(hit.result);

        // An earlier prefix that matches must not count.
        let earlier_prefix = evaluate(
            &spec(
                ConditionType::Sequence,
                json!({"events": ["BROWSE", "ADD_TO_CART"]}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(!earlier_prefix.result);
    }

    #[test]
    fn sequence_time_window_bounds_first_to_last() {
        let now = Utc::now();
        let trigger = event_at("e2", "CHECKOUT", now);
        let history = vec![event_at("e1", "BROWSE", now - Duration::minutes(90))];

        let too_slow = evaluate(
            &spec(
                ConditionType::Sequence,
                json!({"events": ["BROWSE", "CHECKOUT"], "timeWindow": 60}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(!too_slow.result);

        let ok = evaluate(
            &spec(
                ConditionType::Sequence,
                json!({"events": ["BROWSE", "CHECKOUT"], "timeWindow": 120}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(ok.result);
    }

    #[test]
    fn time_since_last_event_is_exclusive_of_trigger() {
        let now = Utc::now();
        let trigger = event_at("e2", "LOGIN", now);

        // Only the trigger itself exists: condition holds.
        let alone = evaluate(
            &spec(
                ConditionType::TimeSinceLastEvent,
                json!({"eventType": "LOGIN", "minMinutes": 30}),
            ),
            &EvalContext::new(&trigger, std::slice::from_ref(&trigger)),
        );
        assert!(alone.result);

        let history = vec![event_at("e1", "LOGIN", now - Duration::minutes(10))];
        let recent = evaluate(
            &spec(
                ConditionType::TimeSinceLastEvent,
                json!({"eventType": "LOGIN", "minMinutes": 30}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(!recent.result);

        let history = vec![event_at("e1", "LOGIN", now - Duration::minutes(45))];
        let stale = evaluate(
            &spec(
                ConditionType::TimeSinceLastEvent,
                json!({"eventType": "LOGIN", "minMinutes": 30}),
            ),
            &EvalContext::new(&trigger, &history),
        );
        assert!(stale.result);
    }

    #[test]
    fn first_occurrence_checks_prior_history_only() {
        let now = Utc::now();
        let trigger = event_at("e2", "USER_COMMENTED", now);

        let first = evaluate(
            &spec(ConditionType::FirstOccurrence, json!({"eventType": "USER_COMMENTED"})),
            &EvalContext::new(&trigger, std::slice::from_ref(&trigger)),
        );
        assert!(first.result);

        let history = vec![
            event_at("e1", "USER_COMMENTED", now - Duration::minutes(1)),
            trigger.clone(),
        ];
        let repeat = evaluate(
            &spec(ConditionType::FirstOccurrence, json!({"eventType": "USER_COMMENTED"})),
            &EvalContext::new(&trigger, &history),
        );
        assert!(!repeat.result);
    }

    #[test]
    fn custom_script_fails_closed() {
        let trigger = event_at("e1", "LOGIN", Utc::now());
        let trace = evaluate(
            &spec(ConditionType::CustomScript, json!({"script": "return true"})),
            &EvalContext::new(&trigger, &[]),
        );
        assert!(!trace.result);
        assert_eq!(trace.details, "unsupported");
    }

    #[test]
    fn missing_parameters_fold_into_false() {
        let trigger = event_at("e1", "LOGIN", Utc::now());
        let trace = evaluate(
            &spec(ConditionType::Count, json!({})),
            &EvalContext::new(&trigger, &[]),
        );
        assert!(!trace.result);
        assert!(trace.details.contains("missing"));
    }
}
