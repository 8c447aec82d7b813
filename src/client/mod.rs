//! The `client` module defines the representation of a client connected to
//! the in-process broker.
//!
//! It provides the `Client` struct, which encapsulates the state of a single
//! broker session: its session id, its optional durable identity and the
//! channel used to push frames to it.

pub mod pubsub_client;
pub use pubsub_client::Client;
