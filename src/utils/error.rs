//! The `error` module defines the error type shared by every part of
//! `forumsub`: configuration, the broker client, the in-process broker and
//! the subscriber façade.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid broker url `{url}`: {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not connect to broker at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("broker rejected the request: {0}")]
    Rejected(String),

    #[error("connection to broker is closed")]
    Disconnected,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("destination name must not be empty")]
    InvalidDestination,

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("persistence error: {0}")]
    Persistence(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failure reported by a message handler. The delivery is not acknowledged,
/// so queue messages stay in the broker backlog.
#[derive(Debug, Error)]
#[error("handler `{listener}` failed: {reason}")]
pub struct HandlerError {
    pub listener: String,
    pub reason: String,
}

impl HandlerError {
    pub fn new(listener: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            reason: reason.into(),
        }
    }
}
