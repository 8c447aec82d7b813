//! Broker engine
//!
//! In-memory routing plus a persistent backlog for queues:
//! - topics fan a message out to every current subscriber; nothing is kept
//! - queues store each message, hand it to one consumer (round robin) and
//!   drop it from the backlog only when that consumer acknowledges it
//! - when a session goes away its unacknowledged queue messages become
//!   eligible again and are redelivered to the next consumer of that queue
//!
//! The API is synchronous and meant to sit behind `Arc<Mutex<Broker>>` in the
//! transport. Sends only push onto per-client channels, so the lock is never
//! held across network I/O.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::{DestinationKind, Message};
use crate::broker::queue::Queue;
use crate::broker::topic::{SubscriberId, Topic};
use crate::client::Client;
use crate::persistence::Persistence;
use crate::transport::message::ServerMessage;
use crate::utils::error::{Error, Result};

/// A queue message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub queue: String,
    pub subscriber: SubscriberId,
}

#[derive(Debug)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub queues: HashMap<String, Queue>,
    pub clients: HashMap<SubscriberId, Client>,
    pub in_flight: HashMap<String, InFlight>,
    persistence: Persistence,
}

impl Broker {
    pub fn new(persistence: Persistence) -> Self {
        Self {
            topics: HashMap::new(),
            queues: HashMap::new(),
            clients: HashMap::new(),
            in_flight: HashMap::new(),
            persistence,
        }
    }

    /// Broker backed by a temporary database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Persistence::temporary()?))
    }

    /// Registers a session. A durable identity may only be connected once.
    pub fn register_client(&mut self, client: Client) -> Result<()> {
        if let Some(client_id) = &client.client_id {
            let taken = self
                .clients
                .values()
                .any(|c| c.client_id.as_ref() == Some(client_id));
            if taken {
                return Err(Error::Rejected(format!(
                    "client id `{client_id}` already connected"
                )));
            }
        }
        info!(session = %client.id, client_id = ?client.client_id, "client registered");
        self.clients.insert(client.id.clone(), client);
        Ok(())
    }

    pub fn remove_client(&mut self, client_id: &SubscriberId) {
        self.clients.remove(client_id);
    }

    pub fn subscribe(
        &mut self,
        destination: &str,
        kind: DestinationKind,
        subscriber: SubscriberId,
    ) -> Result<()> {
        match kind {
            DestinationKind::Topic => {
                self.topics
                    .entry(destination.to_string())
                    .or_insert_with(|| Topic::new(destination))
                    .subscribe(subscriber);
                Ok(())
            }
            DestinationKind::Queue => {
                let identity = self
                    .clients
                    .get(&subscriber)
                    .and_then(|c| c.client_id.clone());
                let queue = self
                    .queues
                    .entry(destination.to_string())
                    .or_insert_with(|| Queue::new(destination));

                let detached = match (queue.owner.clone(), identity) {
                    (Some(owner), identity) if identity.as_ref() != Some(&owner) => {
                        warn!(
                            queue = destination,
                            session = %subscriber,
                            "queue bound to another identity"
                        );
                        return Err(Error::Rejected(format!(
                            "queue `{destination}` is bound to another subscriber"
                        )));
                    }
                    (None, Some(identity)) => {
                        info!(queue = destination, owner = %identity, "queue claimed");
                        queue.claim(identity)
                    }
                    _ => Vec::new(),
                };
                queue.subscribe(subscriber);

                if !detached.is_empty() {
                    debug!(
                        queue = destination,
                        detached = detached.len(),
                        "anonymous consumers detached"
                    );
                    self.in_flight.retain(|_, flight| {
                        flight.queue != destination || !detached.contains(&flight.subscriber)
                    });
                }
                self.dispatch_backlog(destination)
            }
        }
    }

    /// Does nothing when the destination does not exist.
    pub fn unsubscribe(
        &mut self,
        destination: &str,
        kind: DestinationKind,
        subscriber: &SubscriberId,
    ) {
        match kind {
            DestinationKind::Topic => {
                if let Some(t) = self.topics.get_mut(destination) {
                    t.unsubscribe(subscriber);
                }
            }
            DestinationKind::Queue => {
                if let Some(q) = self.queues.get_mut(destination) {
                    q.unsubscribe(subscriber);
                }
            }
        }
    }

    /// Routes a message. Topic messages go to every subscriber and are not
    /// kept. Queue messages are persisted first, then delivered to one
    /// consumer if any is attached.
    pub fn publish(&mut self, msg: Message) -> Result<()> {
        match msg.kind {
            DestinationKind::Topic => {
                let Some(topic) = self.topics.get(&msg.destination) else {
                    debug!(topic = %msg.destination, "no subscribers, message dropped");
                    return Ok(());
                };
                let frame = encode(&msg)?;
                for sub_id in &topic.subscribers {
                    self.send_frame(sub_id, frame.clone());
                }
                Ok(())
            }
            DestinationKind::Queue => {
                self.persistence.store_message(&msg)?;
                let consumer = self
                    .queues
                    .get_mut(&msg.destination)
                    .and_then(Queue::next_consumer);
                match consumer {
                    Some(sub_id) => self.deliver_queued(&sub_id, &msg),
                    None => {
                        debug!(queue = %msg.destination, "no consumer, message kept in backlog");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Acknowledges a queue message, removing it from the backlog. Only the
    /// session the message was handed to may acknowledge it.
    pub fn handle_ack(&mut self, session: &SubscriberId, message_id: &str) -> Result<()> {
        let held = self
            .in_flight
            .get(message_id)
            .map(|flight| (flight.queue.clone(), flight.subscriber.clone()));
        match held {
            Some((queue, holder)) if &holder == session => {
                self.in_flight.remove(message_id);
                self.persistence.remove_message(&queue, message_id)?;
                debug!(message_id, queue = %queue, "message acknowledged");
            }
            Some((_, holder)) => warn!(
                message_id,
                %session,
                %holder,
                "ack from a session that does not hold the message"
            ),
            None => warn!(message_id, "ack for unknown message id"),
        }
        Ok(())
    }

    /// Removes a session and all its subscriptions. Its unacknowledged queue
    /// messages are handed to the remaining consumers, if any.
    pub fn cleanup_client(&mut self, client_id: &SubscriberId) {
        self.remove_client(client_id);

        for topic in self.topics.values_mut() {
            topic.unsubscribe(client_id);
        }
        for queue in self.queues.values_mut() {
            queue.unsubscribe(client_id);
        }

        let mut released: Vec<String> = Vec::new();
        self.in_flight.retain(|_, flight| {
            if &flight.subscriber == client_id {
                if !released.contains(&flight.queue) {
                    released.push(flight.queue.clone());
                }
                false
            } else {
                true
            }
        });

        for queue in released {
            if let Err(e) = self.dispatch_backlog(&queue) {
                warn!(queue = %queue, error = %e, "failed to redeliver backlog");
            }
        }

        info!(session = %client_id, "cleaned up client");
    }

    /// Hands every backlog message that is not already in flight to the
    /// queue's consumers.
    fn dispatch_backlog(&mut self, queue_name: &str) -> Result<()> {
        let has_consumers = self
            .queues
            .get(queue_name)
            .is_some_and(Queue::has_consumers);
        if !has_consumers {
            return Ok(());
        }

        for stored in self.persistence.load_messages(queue_name)? {
            if self.in_flight.contains_key(&stored.message_id) {
                continue;
            }
            let Some(sub_id) = self.queues.get_mut(queue_name).and_then(Queue::next_consumer)
            else {
                break;
            };
            self.deliver_queued(&sub_id, &Message::from(stored))?;
        }
        Ok(())
    }

    fn deliver_queued(&mut self, sub_id: &SubscriberId, msg: &Message) -> Result<()> {
        let frame = encode(msg)?;
        if self.send_frame(sub_id, frame) {
            self.in_flight.insert(
                msg.message_id.clone(),
                InFlight {
                    queue: msg.destination.clone(),
                    subscriber: sub_id.clone(),
                },
            );
        }
        Ok(())
    }

    fn send_frame(&self, sub_id: &SubscriberId, frame: WsMessage) -> bool {
        match self.clients.get(sub_id) {
            Some(client) => match client.sender.send(frame) {
                Ok(()) => true,
                Err(e) => {
                    warn!(session = %sub_id, error = %e, "failed to send");
                    false
                }
            },
            None => {
                warn!(session = %sub_id, "no client registered with this id");
                false
            }
        }
    }
}

fn encode(msg: &Message) -> Result<WsMessage> {
    let json = serde_json::to_string(&ServerMessage::from(msg))?;
    Ok(WsMessage::text(json))
}
