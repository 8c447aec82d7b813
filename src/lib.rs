//! # forumsub
//!
//! `forumsub` is a small forum publish/subscribe client together with the
//! in-process WebSocket broker it talks to.
//!
//! A participant publishes string messages to the forum topics and listens on
//! `tema1`..`tema4` plus a private queue named after its user id. Every
//! listener only records what it receives.
//!
//! ## Core Modules
//!
//! - `broker`: routes topic messages to all subscribers and queue messages to one consumer.
//! - `client`: a session connected to the broker.
//! - `config`: loads and validates settings.
//! - `messaging`: the broker client (connections, templates, listener containers).
//! - `persistence`: sled-backed backlog of unacknowledged queue messages.
//! - `subscriber`: the forum façade and its listeners.
//! - `transport`: the broker's WebSocket server and JSON frame protocol.
//! - `utils`: error type and logging bootstrap.

pub mod broker;
pub mod client;
pub mod config;
pub mod messaging;
pub mod persistence;
pub mod subscriber;
pub mod transport;
pub mod utils;

pub use utils::error::{Error, HandlerError, Result};

#[cfg(test)]
pub(crate) mod test_helpers;
