use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::debug;

use crate::broker::message::{DestinationKind, Message};
use crate::utils::error::Result;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message_id: String,
    pub destination: String,
    pub payload: String,
    pub timestamp: i64,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Message {
            destination: stored.destination,
            kind: DestinationKind::Queue,
            payload: stored.payload,
            timestamp: stored.timestamp,
            message_id: stored.message_id,
        }
    }
}

#[derive(Clone)]
pub struct Persistence {
    db: Db,
    ttl_seconds: Option<i64>,
    max_messages_per_queue: Option<usize>,
}

impl Persistence {
    pub fn open(
        path: &str,
        ttl_seconds: Option<i64>,
        max_messages_per_queue: Option<usize>,
    ) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            ttl_seconds,
            max_messages_per_queue,
        })
    }

    /// A database that lives only as long as this handle. Used by tests and
    /// by brokers that do not need to survive a restart.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            ttl_seconds: None,
            max_messages_per_queue: None,
        })
    }

    fn queue_tree(&self, queue: &str) -> Result<Tree> {
        Ok(self.db.open_tree(format!("queue/{queue}"))?)
    }

    /// Appends a message to the backlog of its queue. Keys are
    /// monotonically increasing so iteration follows insertion order.
    pub fn store_message(&self, msg: &Message) -> Result<()> {
        let stored = StoredMessage {
            message_id: msg.message_id.clone(),
            destination: msg.destination.clone(),
            payload: msg.payload.clone(),
            timestamp: msg.timestamp,
        };
        let serialized = serde_json::to_vec(&stored)?;
        let tree = self.queue_tree(&msg.destination)?;
        let key = self.db.generate_id()?;
        tree.insert(key.to_be_bytes(), serialized)?;

        if let Some(max) = self.max_messages_per_queue {
            while tree.len() > max {
                if let Some((_, evicted)) = tree.pop_min()? {
                    debug!(queue = %msg.destination, bytes = evicted.len(), "evicted oldest queued message");
                }
            }
        }
        Ok(())
    }

    /// Removes an acknowledged message. Returns `false` if it was not stored.
    pub fn remove_message(&self, queue: &str, message_id: &str) -> Result<bool> {
        let tree = self.queue_tree(queue)?;
        for entry in tree.iter() {
            let (key, val) = entry?;
            let stored: StoredMessage = serde_json::from_slice(&val)?;
            if stored.message_id == message_id {
                tree.remove(key)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns the backlog of `queue` oldest first, after dropping expired entries.
    pub fn load_messages(&self, queue: &str) -> Result<Vec<StoredMessage>> {
        let tree = self.queue_tree(queue)?;
        self.cleanup_old_messages(&tree)?;
        let mut messages = Vec::new();
        for entry in tree.iter() {
            let (_, val) = entry?;
            messages.push(serde_json::from_slice(&val)?);
        }
        Ok(messages)
    }

    fn cleanup_old_messages(&self, tree: &Tree) -> Result<()> {
        let Some(ttl) = self.ttl_seconds else {
            return Ok(());
        };
        let Some(expiry_time) = Utc::now()
            .timestamp_millis()
            .checked_sub(ttl.saturating_mul(1000))
        else {
            return Ok(());
        };

        let mut old_keys = Vec::new();
        for entry in tree.iter() {
            let (key, val) = entry?;
            let stored: StoredMessage = serde_json::from_slice(&val)?;
            if stored.timestamp < expiry_time {
                old_keys.push(key);
            }
        }

        for key in old_keys {
            tree.remove(key)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("max_messages_per_queue", &self.max_messages_per_queue)
            .finish()
    }
}
