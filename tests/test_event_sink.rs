//! Rule event sink tests
//!
//! Events arrive tagged by the broker rule that produced them; the sink must
//! record each one under its `rule_type` and keep the full event.

use devicelink::sink::{parse_events, rule_type, EventSink, MemoryEventSink, TracingEventSink, UNKNOWN_RULE_TYPE};
use serde_json::json;

#[test]
fn test_enriched_events_keep_their_rule_type_and_fields() {
    // Arrange: the two lookups a rule runs against each telemetry message
    let input = r#"
{"rule_type": "DESCRIBE_THING", "timestamp": 1700000000000, "clientId": "test-device-001", "deviceDetails": {"thingName": "test-device-001", "attributes": {"model": "sensor-v2"}}}
{"rule_type": "LIST_THING_GROUPS", "timestamp": 1700000000000, "clientId": "test-device-001", "deviceGroups": {"thingGroups": [{"groupName": "lab"}]}}
"#;
    let sink = MemoryEventSink::new();

    // Act
    for event in parse_events(input).unwrap() {
        sink.record(&event);
    }

    // Assert
    let recorded = sink.events();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].rule_type, "DESCRIBE_THING");
    assert_eq!(recorded[0].event["deviceDetails"]["attributes"]["model"], "sensor-v2");
    assert_eq!(recorded[1].rule_type, "LIST_THING_GROUPS");
    assert_eq!(recorded[1].event["deviceGroups"]["thingGroups"][0]["groupName"], "lab");
}

#[test]
fn test_untagged_event_is_recorded_as_unknown() {
    let event = json!({"timestamp": 1700000000000_i64, "clientId": "test-device-001"});

    let recorded = TracingEventSink::new().record(&event);

    assert_eq!(recorded.rule_type, UNKNOWN_RULE_TYPE);
    assert_eq!(recorded.event, event);
}

#[test]
fn test_sinks_are_usable_as_trait_objects() {
    let sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingEventSink::new()), Box::new(MemoryEventSink::new())];
    let event = json!({"rule_type": "DESCRIBE_THING"});

    for sink in &sinks {
        assert_eq!(sink.record(&event).rule_type, rule_type(&event));
    }
}

#[test]
fn test_array_input_is_a_list_of_events() {
    let events = parse_events(r#"[{"rule_type": "A"}, {"rule_type": "B"}, {}]"#).unwrap();

    let types: Vec<&str> = events.iter().map(rule_type).collect();
    assert_eq!(types, vec!["A", "B", UNKNOWN_RULE_TYPE]);
}

#[test]
fn test_malformed_line_fails_the_whole_batch() {
    let result = parse_events("{\"rule_type\": \"A\"}\nnot json\n");

    assert!(result.is_err());
}
