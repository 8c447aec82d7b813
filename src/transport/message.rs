//! JSON frames exchanged between the broker and its clients.

use serde::{Deserialize, Serialize};

use crate::broker::message::{DestinationKind, Message};

/// Frames sent by a client to the broker. `Connect` must come first.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Subscribe {
        request_id: u64,
        destination: String,
        kind: DestinationKind,
    },
    Unsubscribe {
        request_id: u64,
        destination: String,
        kind: DestinationKind,
    },
    Publish {
        request_id: u64,
        destination: String,
        kind: DestinationKind,
        payload: String,
    },
    Ack {
        message_id: String,
    },
}

/// Frames sent by the broker to a client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: String,
    },
    Receipt {
        request_id: u64,
    },
    Message {
        destination: String,
        kind: DestinationKind,
        payload: String,
        message_id: String,
        timestamp: i64,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id: None,
        }
    }

    pub fn request_error(request_id: u64, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id: Some(request_id),
        }
    }
}

impl From<&Message> for ServerMessage {
    fn from(msg: &Message) -> Self {
        ServerMessage::Message {
            destination: msg.destination.clone(),
            kind: msg.kind,
            payload: msg.payload.clone(),
            message_id: msg.message_id.clone(),
            timestamp: msg.timestamp,
        }
    }
}
