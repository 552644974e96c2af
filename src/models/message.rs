use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// The "user created" fact published by the user service. Immutable; may be
/// delivered more than once under at-least-once semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreatedEvent {
    pub uuid: Uuid,
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// An event scheduled for another attempt. On the wire the body is the event
/// JSON and `retry_count` travels in the `retryCount` header; the envelope is
/// assembled at the consume boundary.
#[derive(Debug, Clone)]
pub struct RetryEnvelope {
    pub event: UserCreatedEvent,
    pub retry_count: u32,
}

/// Terminal record published to the dead-letter exchange. `original_event`
/// holds the decoded event when the payload parsed, otherwise the raw body,
/// so poison messages remain inspectable by operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_event: JsonValue,
    pub error: DeadLetterError,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterError {
    pub message: String,
}

impl DeadLetterRecord {
    pub fn new(original_event: JsonValue, message: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            original_event,
            error: DeadLetterError { message },
            timestamp,
        }
    }
}
