use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::DestinationKind;
use crate::messaging::{
    BrokerTemplate, Delivery, ListenerContainer, ListenerEndpoint, MessageHandler, Messaging,
};
use crate::subscriber::log::{MessageLog, ReceivedMessage};
use crate::utils::error::{HandlerError, Result};

/// Static description of one inbound handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub id: &'static str,
    pub destination: String,
    pub kind: DestinationKind,
    pub description: &'static str,
}

/// The broadcast topics every forum participant listens to.
pub const FORUM_TOPICS: [&str; 4] = ["tema1", "tema2", "tema3", "tema4"];

/// Publishes to forum topics and owns the fixed set of listeners.
pub struct SubscriberService {
    topic_template: BrokerTemplate,
    log: Arc<dyn MessageLog>,
    user_id: String,
}

impl SubscriberService {
    pub fn new(
        topic_template: BrokerTemplate,
        log: Arc<dyn MessageLog>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            topic_template,
            log,
            user_id: user_id.into(),
        }
    }

    /// Publishes `message` to `topic`. Errors are returned to the caller
    /// untouched; nothing is retried.
    pub async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<()> {
        match self.topic_template.convert_and_send(topic, message).await {
            Ok(()) => {
                debug!(%topic, "message published");
                Ok(())
            }
            Err(e) => {
                warn!(%topic, error = %e, "publish failed");
                Err(e)
            }
        }
    }

    pub fn listener_specs(&self) -> Vec<ListenerSpec> {
        let descriptions = [
            "Message published on topic 1",
            "Message published on topic 2",
            "Message published on topic 3",
            "Message published on topic 4",
        ];
        let ids = ["topic-1", "topic-2", "topic-3", "topic-4"];

        let mut specs: Vec<ListenerSpec> = FORUM_TOPICS
            .iter()
            .zip(ids)
            .zip(descriptions)
            .map(|((topic, id), description)| ListenerSpec {
                id,
                destination: (*topic).to_string(),
                kind: DestinationKind::Topic,
                description,
            })
            .collect();
        specs.push(ListenerSpec {
            id: "direct",
            destination: self.user_id.clone(),
            kind: DestinationKind::Queue,
            description: "Private message received",
        });
        specs
    }

    /// Endpoints for every listener of `kind`, each recording into the log.
    pub fn endpoints(&self, kind: DestinationKind) -> Vec<ListenerEndpoint> {
        self.listener_specs()
            .into_iter()
            .filter(|spec| spec.kind == kind)
            .map(|spec| ListenerEndpoint {
                id: spec.id.to_string(),
                destination: spec.destination,
                handler: self.handler(spec.id, spec.description),
            })
            .collect()
    }

    fn handler(&self, id: &'static str, description: &'static str) -> MessageHandler {
        let log = self.log.clone();
        Arc::new(move |delivery: Delivery| -> std::result::Result<(), HandlerError> {
            log.record(ReceivedMessage {
                listener: id.to_string(),
                description: description.to_string(),
                destination: delivery.destination,
                payload: delivery.payload,
            });
            Ok(())
        })
    }

    /// Starts the topic listeners on the topic factory and the direct
    /// listener on the queue factory.
    pub async fn start(&self, messaging: &Messaging) -> Result<Vec<ListenerContainer>> {
        let mut containers = Vec::new();
        for kind in [DestinationKind::Topic, DestinationKind::Queue] {
            let endpoints = self.endpoints(kind);
            if endpoints.is_empty() {
                continue;
            }
            match messaging.factory_for(kind).start(endpoints).await {
                Ok(container) => containers.push(container),
                Err(e) => {
                    for container in containers {
                        container.stop();
                    }
                    return Err(e);
                }
            }
        }
        Ok(containers)
    }
}
