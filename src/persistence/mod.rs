//! The `persistence` module keeps queue messages until their consumer
//! acknowledges them.
//!
//! This is what makes a queue bound to a durable client identity survive
//! disconnects: whatever was not acknowledged is replayed when a consumer
//! subscribes again. It uses `sled` as an embedded key-value store.

pub mod sled_store;

pub use sled_store::{Persistence, StoredMessage};
