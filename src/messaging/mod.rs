//! The `messaging` module is the broker client.
//!
//! - `ConnectionFactory` / `Connection`: one validated broker URL, sockets
//!   opened from it, request/receipt plumbing and delivery dispatch.
//! - `BrokerTemplate`: sends string payloads in a fixed delivery mode.
//! - `ListenerContainerFactory` / `ListenerContainer`: bind handlers to
//!   destinations, either broadcast or as a durable point-to-point consumer.
//! - `Messaging`: the set of the above built from `Settings` at startup.

pub mod connection;
pub mod container;
pub mod setup;
pub mod template;

pub use connection::{Connection, ConnectionFactory, Delivery, MessageHandler};
pub use container::{ListenerContainer, ListenerContainerFactory, ListenerEndpoint};
pub use setup::Messaging;
pub use template::BrokerTemplate;
