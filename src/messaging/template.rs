use crate::broker::DestinationKind;
use crate::messaging::connection::Connection;
use crate::utils::error::Result;

/// Sends string payloads over a shared connection. The delivery mode is fixed
/// at construction: broadcast when `pub_sub_domain` is set, point-to-point
/// otherwise.
#[derive(Debug, Clone)]
pub struct BrokerTemplate {
    connection: Connection,
    pub_sub_domain: bool,
}

impl BrokerTemplate {
    pub fn new(connection: Connection, pub_sub_domain: bool) -> Self {
        Self {
            connection,
            pub_sub_domain,
        }
    }

    pub fn is_pub_sub_domain(&self) -> bool {
        self.pub_sub_domain
    }

    pub fn destination_kind(&self) -> DestinationKind {
        if self.pub_sub_domain {
            DestinationKind::Topic
        } else {
            DestinationKind::Queue
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns once the broker has accepted the message.
    pub async fn convert_and_send(&self, destination: &str, payload: &str) -> Result<()> {
        self.connection
            .send(destination, self.destination_kind(), payload)
            .await
    }
}
