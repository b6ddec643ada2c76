//! Event data models and ingest validation

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Ingest tolerates this much forward clock skew on `occurredAt`.
pub const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

/// An immutable record of a user action consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub event_id: String,
    pub event_type: String,
    pub user_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Zero for events from external producers; incremented on every
    /// synthetic event the executor emits.
    #[serde(default)]
    pub cascade_depth: u32,
}

impl GameEvent {
    /// Fetch an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Case-insensitive event type comparison, used for trigger matching.
    pub fn is_type(&self, event_type: &str) -> bool {
        self.event_type.eq_ignore_ascii_case(event_type)
    }
}

/// Wire form of an event as accepted by the ingest and dry-run endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDocument {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    pub user_id: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EventDocument {
    /// Validate the document and materialize a [`GameEvent`], generating an
    /// id and timestamp where the producer left them out.
    pub fn into_event(self, now: DateTime<Utc>) -> Result<GameEvent, Vec<String>> {
        let mut errors = Vec::new();

        if self.event_type.trim().is_empty() {
            errors.push("eventType must be non-empty".to_string());
        }
        if self.user_id.trim().is_empty() {
            errors.push("userId must be non-empty".to_string());
        }

        let occurred_at = self.occurred_at.unwrap_or(now);
        if occurred_at > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
            errors.push(format!(
                "occurredAt {} is too far in the future",
                occurred_at.to_rfc3339()
            ));
        }

        if let Some(id) = &self.event_id {
            if id.trim().is_empty() {
                errors.push("eventId must be non-empty when present".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(GameEvent {
            event_id: self.event_id.unwrap_or_else(new_event_id),
            event_type: self.event_type,
            user_id: self.user_id,
            occurred_at,
            attributes: self.attributes,
            cascade_depth: 0,
        })
    }
}

/// Event definition registered in the catalog. The payload schema maps
/// required attribute names to type labels (`string`, `number`, `boolean`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub payload_schema: Option<HashMap<String, String>>,
}

impl EventDefinition {
    /// Check an event's attributes against the payload schema. Returns the
    /// list of violations; empty means valid.
    pub fn validate_payload(&self, event: &GameEvent) -> Vec<String> {
        let Some(schema) = &self.payload_schema else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for (field, type_label) in schema {
            match event.attributes.get(field) {
                None => errors.push(format!("missing required attribute '{}'", field)),
                Some(value) => {
                    let ok = match type_label.as_str() {
                        "string" => value.is_string(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        _ => true,
                    };
                    if !ok {
                        errors.push(format!(
                            "attribute '{}' must be of type {}",
                            field, type_label
                        ));
                    }
                }
            }
        }
        errors
    }
}

/// Generate a 32-character hex event id without dashes.
pub fn new_event_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(event_type: &str, user_id: &str) -> EventDocument {
        EventDocument {
            event_id: None,
            event_type: event_type.to_string(),
            user_id: user_id.to_string(),
            occurred_at: None,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn generates_id_and_timestamp() {
        let now = Utc::now();
        let event = doc("USER_COMMENTED", "u1").into_event(now).unwrap();
        assert_eq!(event.event_id.len(), 32);
        assert!(event.event_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(event.occurred_at, now);
        assert_eq!(event.cascade_depth, 0);
    }

    #[test]
    fn rejects_empty_fields() {
        let now = Utc::now();
        let errors = doc("", "").into_event(now).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn rejects_future_timestamps() {
        let now = Utc::now();
        let mut document = doc("LOGIN", "u1");
        document.occurred_at = Some(now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES + 1));
        assert!(document.into_event(now).is_err());
    }

    #[test]
    fn trigger_matching_is_case_insensitive() {
        let now = Utc::now();
        let event = doc("User_Commented", "u1").into_event(now).unwrap();
        assert!(event.is_type("USER_COMMENTED"));
    }

    #[test]
    fn payload_schema_checks_presence_and_type() {
        let definition = EventDefinition {
            id: "USER_PURCHASED_PRODUCT".to_string(),
            description: "a purchase".to_string(),
            payload_schema: Some(HashMap::from([
                ("amount".to_string(), "number".to_string()),
                ("productId".to_string(), "string".to_string()),
            ])),
        };

        let now = Utc::now();
        let mut document = doc("USER_PURCHASED_PRODUCT", "u1");
        document.attributes.insert("amount".to_string(), json!("fifty"));
        let event = document.into_event(now).unwrap();

        let errors = definition.validate_payload(&event);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("productId")));
        assert!(errors.iter().any(|e| e.contains("amount")));
    }

    #[test]
    fn event_ids_are_unique() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
    }
}
