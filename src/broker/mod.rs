//! The `broker` module is the in-process message broker.
//!
//! It routes topic messages to every subscriber and queue messages to one
//! consumer at a time, keeping queue messages in persistence until they are
//! acknowledged.

pub mod engine;
pub mod message;
pub mod queue;
pub mod topic;

pub use engine::Broker;
pub use message::{DestinationKind, Message};

#[cfg(test)]
mod tests;
