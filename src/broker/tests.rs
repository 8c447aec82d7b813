use super::Broker;
use super::message::{DestinationKind, Message};
use super::queue::Queue;
use super::topic::Topic;
use crate::client::Client;
use crate::transport::message::ServerMessage;
use crate::utils::error::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

fn connect(broker: &mut Broker) -> (String, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let id = client.id.clone();
    broker.register_client(client).unwrap();
    (id, rx)
}

fn connect_as(broker: &mut Broker, client_id: &str) -> (String, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx).with_client_id(client_id);
    let id = client.id.clone();
    broker.register_client(client).unwrap();
    (id, rx)
}

fn next_delivery(rx: &mut UnboundedReceiver<WsMessage>) -> Option<(String, String, String)> {
    let frame = rx.try_recv().ok()?;
    match serde_json::from_str::<ServerMessage>(frame.to_text().unwrap()).unwrap() {
        ServerMessage::Message {
            destination,
            payload,
            message_id,
            ..
        } => Some((destination, payload, message_id)),
        other => panic!("Expected a message frame, got {other:?}"),
    }
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("tema1");
    topic.subscribe("client1".to_string());
    topic.subscribe("client1".to_string());
    assert_eq!(topic.subscribers.len(), 1);
    topic.unsubscribe(&"client1".to_string());
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_queue_round_robin() {
    let mut queue = Queue::new("jobs");
    assert_eq!(queue.next_consumer(), None);
    queue.subscribe("a".to_string());
    queue.subscribe("b".to_string());
    queue.subscribe("a".to_string());
    assert_eq!(queue.next_consumer().as_deref(), Some("a"));
    assert_eq!(queue.next_consumer().as_deref(), Some("b"));
    assert_eq!(queue.next_consumer().as_deref(), Some("a"));
    queue.unsubscribe(&"a".to_string());
    assert_eq!(queue.next_consumer().as_deref(), Some("b"));
}

#[test]
fn test_broker_new() {
    let broker = Broker::in_memory().unwrap();
    assert!(broker.topics.is_empty());
    assert!(broker.queues.is_empty());
    assert!(broker.clients.is_empty());
    assert!(broker.in_flight.is_empty());
}

#[test]
fn test_duplicate_client_id_rejected() {
    let mut broker = Broker::in_memory().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<WsMessage>();
    broker
        .register_client(Client::new(tx.clone()).with_client_id("alice"))
        .unwrap();
    let err = broker
        .register_client(Client::new(tx).with_client_id("alice"))
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));
}

#[test]
fn test_topic_publish_reaches_every_subscriber_once() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, mut rx_b) = connect(&mut broker);
    broker.subscribe("tema1", DestinationKind::Topic, a).unwrap();
    broker.subscribe("tema1", DestinationKind::Topic, b).unwrap();

    broker
        .publish(Message::new("tema1", DestinationKind::Topic, "hello"))
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let (destination, payload, _) = next_delivery(rx).unwrap();
        assert_eq!(destination, "tema1");
        assert_eq!(payload, "hello");
        assert!(rx.try_recv().is_err());
    }
}

#[test]
fn test_topic_isolation() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    broker.subscribe("tema1", DestinationKind::Topic, a).unwrap();

    broker
        .publish(Message::new("tema2", DestinationKind::Topic, "not for you"))
        .unwrap();

    assert!(rx_a.try_recv().is_err());
}

#[test]
fn test_topic_and_queue_with_same_name_are_distinct() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    broker.subscribe("shared", DestinationKind::Topic, a).unwrap();

    broker
        .publish(Message::new("shared", DestinationKind::Queue, "queued"))
        .unwrap();

    assert!(rx_a.try_recv().is_err());
}

#[test]
fn test_publish_to_topic_without_subscribers() {
    let mut broker = Broker::in_memory().unwrap();
    broker
        .publish(Message::new("nobody", DestinationKind::Topic, "hello"))
        .unwrap();
    assert!(broker.topics.is_empty());
}

#[test]
fn test_queue_message_goes_to_one_consumer() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, mut rx_b) = connect(&mut broker);
    broker.subscribe("jobs", DestinationKind::Queue, a).unwrap();
    broker.subscribe("jobs", DestinationKind::Queue, b).unwrap();

    broker
        .publish(Message::new("jobs", DestinationKind::Queue, "one"))
        .unwrap();

    let got_a = next_delivery(&mut rx_a).is_some();
    let got_b = next_delivery(&mut rx_b).is_some();
    assert!(got_a ^ got_b);
}

#[test]
fn test_queue_backlog_replayed_on_subscribe() {
    let mut broker = Broker::in_memory().unwrap();
    broker
        .publish(Message::new("alice", DestinationKind::Queue, "while offline"))
        .unwrap();

    let (a, mut rx_a) = connect(&mut broker);
    broker.subscribe("alice", DestinationKind::Queue, a).unwrap();

    let (_, payload, _) = next_delivery(&mut rx_a).unwrap();
    assert_eq!(payload, "while offline");
    assert_eq!(broker.in_flight.len(), 1);
}

#[test]
fn test_ack_removes_from_backlog() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    broker.subscribe("alice", DestinationKind::Queue, a.clone()).unwrap();
    broker
        .publish(Message::new("alice", DestinationKind::Queue, "ack me"))
        .unwrap();
    let (_, _, message_id) = next_delivery(&mut rx_a).unwrap();

    broker.handle_ack(&a, &message_id).unwrap();
    assert!(broker.in_flight.is_empty());

    // Reconnecting must not replay an acknowledged message.
    broker.cleanup_client(&a);
    let (a2, mut rx_a2) = connect(&mut broker);
    broker.subscribe("alice", DestinationKind::Queue, a2).unwrap();
    assert!(rx_a2.try_recv().is_err());
}

#[test]
fn test_unacked_message_redelivered_after_reconnect() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    broker.subscribe("alice", DestinationKind::Queue, a.clone()).unwrap();
    broker
        .publish(Message::new("alice", DestinationKind::Queue, "hello-1"))
        .unwrap();
    let (_, _, first_id) = next_delivery(&mut rx_a).unwrap();

    broker.cleanup_client(&a);
    assert!(broker.in_flight.is_empty());

    let (a2, mut rx_a2) = connect(&mut broker);
    broker.subscribe("alice", DestinationKind::Queue, a2).unwrap();
    let (_, payload, second_id) = next_delivery(&mut rx_a2).unwrap();
    assert_eq!(payload, "hello-1");
    assert_eq!(first_id, second_id);
}

#[test]
fn test_cleanup_hands_in_flight_to_remaining_consumer() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, mut rx_b) = connect(&mut broker);
    broker.subscribe("jobs", DestinationKind::Queue, a.clone()).unwrap();
    broker.subscribe("jobs", DestinationKind::Queue, b).unwrap();

    broker
        .publish(Message::new("jobs", DestinationKind::Queue, "work"))
        .unwrap();
    // Round robin starts with the first consumer.
    assert!(next_delivery(&mut rx_a).is_some());

    broker.cleanup_client(&a);
    let (_, payload, _) = next_delivery(&mut rx_b).unwrap();
    assert_eq!(payload, "work");
}

#[test]
fn test_ack_unknown_message_is_ignored() {
    let mut broker = Broker::in_memory().unwrap();
    broker
        .handle_ack(&"session-x".to_string(), "does-not-exist")
        .unwrap();
}

#[test]
fn test_publish_to_client_with_closed_channel() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, rx_a) = connect(&mut broker);
    broker.subscribe("tema1", DestinationKind::Topic, a).unwrap();

    // Drop the receiver to close the channel
    drop(rx_a);

    broker
        .publish(Message::new("tema1", DestinationKind::Topic, "hello"))
        .unwrap();
}

#[test]
fn test_cleanup_client_removes_subscriptions() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, _rx) = connect(&mut broker);
    broker.subscribe("tema1", DestinationKind::Topic, a.clone()).unwrap();
    broker.subscribe("alice", DestinationKind::Queue, a.clone()).unwrap();

    broker.cleanup_client(&a);
    assert!(!broker.clients.contains_key(&a));
    assert!(broker.topics["tema1"].subscribers.is_empty());
    assert!(broker.queues["alice"].consumers.is_empty());
}

#[test]
fn test_ack_from_other_session_is_ignored() {
    let mut broker = Broker::in_memory().unwrap();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, _rx_b) = connect(&mut broker);
    broker.subscribe("jobs", DestinationKind::Queue, a.clone()).unwrap();
    broker
        .publish(Message::new("jobs", DestinationKind::Queue, "mine"))
        .unwrap();
    let (_, _, message_id) = next_delivery(&mut rx_a).unwrap();

    broker.handle_ack(&b, &message_id).unwrap();
    assert_eq!(broker.in_flight[&message_id].subscriber, a);

    broker.handle_ack(&a, &message_id).unwrap();
    assert!(broker.in_flight.is_empty());
}

#[test]
fn test_queue_bound_to_first_durable_identity() {
    let mut broker = Broker::in_memory().unwrap();
    let (alice, mut rx_alice) = connect_as(&mut broker, "alice");
    let (mallory, mut rx_mallory) = connect_as(&mut broker, "mallory");
    let (anonymous, _rx_anonymous) = connect(&mut broker);

    broker
        .subscribe("alice", DestinationKind::Queue, alice)
        .unwrap();
    assert_eq!(broker.queues["alice"].owner.as_deref(), Some("alice"));

    let err = broker
        .subscribe("alice", DestinationKind::Queue, mallory)
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));
    let err = broker
        .subscribe("alice", DestinationKind::Queue, anonymous)
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));

    for payload in ["p1", "p2"] {
        broker
            .publish(Message::new("alice", DestinationKind::Queue, payload))
            .unwrap();
    }
    assert_eq!(next_delivery(&mut rx_alice).unwrap().1, "p1");
    assert_eq!(next_delivery(&mut rx_alice).unwrap().1, "p2");
    assert!(rx_mallory.try_recv().is_err());
}

#[test]
fn test_queue_owner_survives_reconnect() {
    let mut broker = Broker::in_memory().unwrap();
    let (alice, _rx) = connect_as(&mut broker, "alice");
    broker
        .subscribe("alice", DestinationKind::Queue, alice.clone())
        .unwrap();
    broker.cleanup_client(&alice);

    let (anonymous, _rx_anonymous) = connect(&mut broker);
    assert!(
        broker
            .subscribe("alice", DestinationKind::Queue, anonymous)
            .is_err()
    );

    let (alice2, mut rx_alice2) = connect_as(&mut broker, "alice");
    broker
        .subscribe("alice", DestinationKind::Queue, alice2)
        .unwrap();
    broker
        .publish(Message::new("alice", DestinationKind::Queue, "back"))
        .unwrap();
    assert_eq!(next_delivery(&mut rx_alice2).unwrap().1, "back");
}

#[test]
fn test_owner_claim_detaches_anonymous_consumers() {
    let mut broker = Broker::in_memory().unwrap();
    let (anonymous, mut rx_anonymous) = connect(&mut broker);
    broker
        .subscribe("alice", DestinationKind::Queue, anonymous.clone())
        .unwrap();
    broker
        .publish(Message::new("alice", DestinationKind::Queue, "early"))
        .unwrap();
    assert!(next_delivery(&mut rx_anonymous).is_some());

    let (alice, mut rx_alice) = connect_as(&mut broker, "alice");
    broker
        .subscribe("alice", DestinationKind::Queue, alice.clone())
        .unwrap();

    assert_eq!(broker.queues["alice"].consumers, vec![alice.clone()]);
    // The unacknowledged message moves to the owner.
    assert_eq!(next_delivery(&mut rx_alice).unwrap().1, "early");
    assert_eq!(broker.in_flight.values().next().unwrap().subscriber, alice);
}
