use futures::future::try_join_all;
use tracing::info;

use crate::broker::DestinationKind;
use crate::messaging::connection::{Connection, ConnectionFactory, MessageHandler};
use crate::utils::error::{Error, Result};

/// A handler bound to one destination.
#[derive(Clone)]
pub struct ListenerEndpoint {
    pub id: String,
    pub destination: String,
    pub handler: MessageHandler,
}

impl std::fmt::Debug for ListenerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEndpoint")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

/// Builds listener containers. Every factory shares the same
/// `ConnectionFactory`; they differ only in delivery mode and identity.
#[derive(Debug, Clone)]
pub struct ListenerContainerFactory {
    connection_factory: ConnectionFactory,
    pub_sub_domain: bool,
    client_id: Option<String>,
    durable: bool,
}

impl ListenerContainerFactory {
    pub fn new(connection_factory: ConnectionFactory) -> Self {
        Self {
            connection_factory,
            pub_sub_domain: false,
            client_id: None,
            durable: false,
        }
    }

    /// Broadcast delivery, anonymous connection.
    pub fn topic(connection_factory: ConnectionFactory) -> Self {
        Self::new(connection_factory).pub_sub_domain(true)
    }

    /// Point-to-point delivery bound to a durable identity.
    pub fn queue(connection_factory: ConnectionFactory, client_id: impl Into<String>) -> Self {
        Self::new(connection_factory)
            .client_id(client_id)
            .durable(true)
    }

    pub fn pub_sub_domain(mut self, enabled: bool) -> Self {
        self.pub_sub_domain = enabled;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn is_pub_sub_domain(&self) -> bool {
        self.pub_sub_domain
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn get_client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn connection_factory(&self) -> &ConnectionFactory {
        &self.connection_factory
    }

    pub fn destination_kind(&self) -> DestinationKind {
        if self.pub_sub_domain {
            DestinationKind::Topic
        } else {
            DestinationKind::Queue
        }
    }

    fn check(&self) -> Result<()> {
        if self.durable && self.pub_sub_domain {
            return Err(Error::Config(
                "durable topic subscriptions are not supported".to_string(),
            ));
        }
        if self.durable && self.client_id.is_none() {
            return Err(Error::Config(
                "a durable listener factory needs a client id".to_string(),
            ));
        }
        Ok(())
    }

    /// Opens one connection for this factory and binds every endpoint on it.
    /// Any failure closes the connection and is returned.
    pub async fn start(&self, endpoints: Vec<ListenerEndpoint>) -> Result<ListenerContainer> {
        self.check()?;
        let connection = self
            .connection_factory
            .connect(self.client_id.as_deref())
            .await?;
        let kind = self.destination_kind();

        let subscriptions = endpoints
            .iter()
            .map(|ep| connection.subscribe(&ep.destination, kind, ep.handler.clone()));
        if let Err(e) = try_join_all(subscriptions).await {
            connection.close();
            return Err(e);
        }

        for ep in &endpoints {
            info!(listener = %ep.id, destination = %ep.destination, %kind, "listener started");
        }

        Ok(ListenerContainer {
            connection,
            kind,
            endpoints: endpoints
                .into_iter()
                .map(|ep| (ep.id, ep.destination))
                .collect(),
        })
    }
}

/// Running listeners of one factory.
#[derive(Debug)]
pub struct ListenerContainer {
    connection: Connection,
    kind: DestinationKind,
    endpoints: Vec<(String, String)>,
}

impl ListenerContainer {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn destinations(&self) -> Vec<&str> {
        self.endpoints.iter().map(|(_, d)| d.as_str()).collect()
    }

    pub fn listener_ids(&self) -> Vec<&str> {
        self.endpoints.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Closes the connection. For a durable queue, undelivered and
    /// unacknowledged messages stay with the broker.
    pub fn stop(self) {
        info!(session = %self.connection.session_id(), "stopping listener container");
        self.connection.close();
    }
}
