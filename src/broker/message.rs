use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery mode of a destination.
///
/// - `Topic`: every current subscriber receives each message.
/// - `Queue`: each message goes to exactly one consumer and is kept by the
///   broker until acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Topic,
    Queue,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Topic => f.write_str("topic"),
            DestinationKind::Queue => f.write_str("queue"),
        }
    }
}

/// Represents a published message inside the broker.
///
/// # Fields
///
/// - `destination` - The topic or queue name.
/// - `kind` - Whether `destination` names a topic or a queue.
/// - `payload` - Opaque UTF-8 content.
/// - `timestamp` - Milliseconds since UNIX epoch, set by the broker on publish.
/// - `message_id` - Broker-assigned id, used by consumers to acknowledge queue messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub destination: String,
    pub kind: DestinationKind,
    pub payload: String,
    pub timestamp: i64,
    pub message_id: String,
}

impl Message {
    /// Builds a message stamped with the current time and a fresh id.
    pub fn new(
        destination: impl Into<String>,
        kind: DestinationKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            kind,
            payload: payload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
