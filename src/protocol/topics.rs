//! Topic construction and device identity validation

use thiserror::Error;

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build the default telemetry topic: `device/{thing_name}/telemetry`
    pub fn build_telemetry_topic(thing_name: &str) -> String {
        format!("device/{thing_name}/telemetry")
    }

    /// Use the override when given, else the default telemetry topic
    pub fn resolve(thing_name: &str, topic_override: Option<&str>) -> String {
        match topic_override {
            Some(topic) if !topic.trim().is_empty() => topic.trim().to_string(),
            _ => Self::build_telemetry_topic(thing_name),
        }
    }
}

/// Validate a thing name. Thing names double as MQTT client identities and
/// must match `[a-zA-Z0-9:_-]+`.
pub fn validate_thing_name(thing_name: &str) -> Result<(), ValidationError> {
    if thing_name.is_empty() {
        return Err(ValidationError::EmptyThingName);
    }

    for ch in thing_name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != ':' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidThingNameChar(ch));
        }
    }

    Ok(())
}

/// Validate a topic for publishing. Wildcards are only meaningful in
/// subscriptions.
pub fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.contains(['#', '+']) {
        return Err(ValidationError::WildcardInTopic(topic.to_string()));
    }
    if topic.contains('\0') {
        return Err(ValidationError::NulInTopic);
    }
    Ok(())
}

/// Validation errors for device identity and topics
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Thing name cannot be empty")]
    EmptyThingName,
    #[error("Thing name contains invalid character: '{0}'")]
    InvalidThingNameChar(char),
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Wildcards are not allowed in publish topic '{0}'")]
    WildcardInTopic(String),
    #[error("Topic contains a NUL character")]
    NulInTopic,
}
