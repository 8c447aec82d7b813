//! Where handlers record what they receive.
//!
//! Handlers never log through a global directly: they get a `MessageLog`.
//! Production wiring uses `TracingMessageLog`; tests use `MemoryMessageLog`
//! and inspect the entries.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

/// One received message as seen by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub listener: String,
    pub description: String,
    pub destination: String,
    pub payload: String,
}

pub trait MessageLog: Send + Sync {
    fn record(&self, entry: ReceivedMessage);
}

/// Emits one `info` event per received message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageLog;

impl MessageLog for TracingMessageLog {
    fn record(&self, entry: ReceivedMessage) {
        info!(
            listener = %entry.listener,
            destination = %entry.destination,
            "{}: {}",
            entry.description,
            entry.payload
        );
    }
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryMessageLog {
    entries: Mutex<Vec<ReceivedMessage>>,
    notify: Notify,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReceivedMessage> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_listener(&self, listener: &str) -> Vec<ReceivedMessage> {
        self.entries()
            .into_iter()
            .filter(|e| e.listener == listener)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` entries exist. Returns `false` on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl MessageLog for MemoryMessageLog {
    fn record(&self, entry: ReceivedMessage) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        self.notify.notify_waiters();
    }
}
