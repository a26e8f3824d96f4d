//! Downstream rule event sink
//!
//! Broker-side rules forward every telemetry message, enriched and tagged with
//! a `rule_type` discriminator naming the rule that matched. A sink records
//! one such event per rule match.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Discriminator used when an event carries no usable `rule_type`
pub const UNKNOWN_RULE_TYPE: &str = "UNKNOWN";

/// Rule that produced `event`; a missing or non-string field is `UNKNOWN`
pub fn rule_type(event: &Value) -> &str {
    event
        .get("rule_type")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_RULE_TYPE)
}

/// Parse rule events from text: one JSON document (an array counts as a
/// list of events) or JSON Lines, one event per non-blank line
pub fn parse_events(input: &str) -> Result<Vec<Value>, serde_json::Error> {
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Array(events)) => Ok(events),
        Ok(event) => Ok(vec![event]),
        Err(_) => input
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect(),
    }
}

/// One recorded rule event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    pub rule_type: String,
    pub event: Value,
}

/// Receives rule events
pub trait EventSink: Send + Sync {
    fn record(&self, event: &Value) -> RecordedEvent;
}

/// Writes a banner line and the indented event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }

    pub fn banner(rule_type: &str) -> String {
        format!("========== {rule_type} ==========")
    }
}

impl EventSink for TracingEventSink {
    fn record(&self, event: &Value) -> RecordedEvent {
        let rule_type = rule_type(event);
        info!(rule_type, "{}", Self::banner(rule_type));

        let rendered = serde_json::to_string_pretty(event).unwrap_or_else(|_| event.to_string());
        info!(rule_type, "{}", rendered);

        RecordedEvent {
            rule_type: rule_type.to_string(),
            event: event.clone(),
        }
    }
}

/// Keeps events in memory, in arrival order
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: &Value) -> RecordedEvent {
        let recorded = RecordedEvent {
            rule_type: rule_type(event).to_string(),
            event: event.clone(),
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorded.clone());
        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_type_is_read_from_event() {
        let event = json!({"rule_type": "DESCRIBE_THING", "timestamp": 1700000000000_i64});
        assert_eq!(rule_type(&event), "DESCRIBE_THING");
    }

    #[test]
    fn test_missing_or_malformed_rule_type_is_unknown() {
        assert_eq!(rule_type(&json!({"timestamp": 1})), UNKNOWN_RULE_TYPE);
        assert_eq!(rule_type(&json!({"rule_type": 7})), UNKNOWN_RULE_TYPE);
        assert_eq!(rule_type(&json!({"rule_type": null})), UNKNOWN_RULE_TYPE);
        assert_eq!(rule_type(&json!([1, 2])), UNKNOWN_RULE_TYPE);
    }

    #[test]
    fn test_tracing_sink_returns_full_event() {
        let event = json!({
            "rule_type": "LIST_THING_GROUPS",
            "clientId": "test-device-001",
            "deviceGroups": {"thingGroups": []}
        });

        let recorded = TracingEventSink::new().record(&event);

        assert_eq!(recorded.rule_type, "LIST_THING_GROUPS");
        assert_eq!(recorded.event, event);
    }

    #[test]
    fn test_parse_events_accepts_document_array_and_lines() {
        let single = parse_events(r#"{"rule_type": "DESCRIBE_THING"}"#).unwrap();
        assert_eq!(single.len(), 1);

        let array = parse_events(r#"[{"rule_type": "A"}, {"rule_type": "B"}]"#).unwrap();
        assert_eq!(array.len(), 2);

        let lines = parse_events("{\"rule_type\": \"A\"}\n\n{\"rule_type\": \"B\"}\n").unwrap();
        assert_eq!(rule_type(&lines[1]), "B");

        assert!(parse_events("{not json").is_err());
    }

    #[test]
    fn test_banner_format() {
        assert_eq!(
            TracingEventSink::banner("DESCRIBE_THING"),
            "========== DESCRIBE_THING =========="
        );
    }

    #[test]
    fn test_memory_sink_keeps_arrival_order() {
        let sink = MemoryEventSink::new();
        sink.record(&json!({"rule_type": "DESCRIBE_THING"}));
        sink.record(&json!({"rule_type": "LIST_THING_GROUPS"}));
        sink.record(&json!({}));

        let types: Vec<String> = sink.events().into_iter().map(|e| e.rule_type).collect();
        assert_eq!(types, vec!["DESCRIBE_THING", "LIST_THING_GROUPS", "UNKNOWN"]);
    }
}
