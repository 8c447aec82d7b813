//! The `transport` module is responsible for network communication between
//! the broker and its clients over WebSockets.
//!
//! It defines the JSON frame protocol and implements the broker side of it:
//! accepting connections, enforcing the `connect` handshake and forwarding
//! client requests to the `Broker`.

pub mod message;
pub mod websocket;

pub use websocket::{serve, start_websocket_server};
