//! The `subscriber` module is the forum participant: it publishes string
//! messages to topics and registers the handlers that log whatever arrives
//! on `tema1`..`tema4` and on the participant's private queue.

pub mod log;
pub mod service;

pub use log::{MemoryMessageLog, MessageLog, ReceivedMessage, TracingMessageLog};
pub use service::{FORUM_TOPICS, ListenerSpec, SubscriberService};
