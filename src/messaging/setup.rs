use tracing::info;

use crate::broker::DestinationKind;
use crate::config::Settings;
use crate::messaging::connection::ConnectionFactory;
use crate::messaging::container::ListenerContainerFactory;
use crate::messaging::template::BrokerTemplate;
use crate::utils::error::Result;

/// Everything built from the broker configuration at startup.
#[derive(Debug, Clone)]
pub struct Messaging {
    pub connection_factory: ConnectionFactory,
    pub topic_template: BrokerTemplate,
    pub topic_factory: ListenerContainerFactory,
    pub queue_factory: ListenerContainerFactory,
}

impl Messaging {
    /// Validates `settings`, opens the publishing connection and prepares
    /// both listener factories. Fails if the broker is unreachable.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let connection_factory = ConnectionFactory::from_settings(&settings.broker)?;
        let connection = connection_factory.connect(None).await?;
        let topic_template = BrokerTemplate::new(connection, true);

        let topic_factory = ListenerContainerFactory::topic(connection_factory.clone());
        let queue_factory =
            ListenerContainerFactory::queue(connection_factory.clone(), &settings.forum.user_id);

        info!(url = %connection_factory.broker_url(), user_id = %settings.forum.user_id, "messaging ready");
        Ok(Self {
            connection_factory,
            topic_template,
            topic_factory,
            queue_factory,
        })
    }

    pub fn factory_for(&self, kind: DestinationKind) -> &ListenerContainerFactory {
        match kind {
            DestinationKind::Topic => &self.topic_factory,
            DestinationKind::Queue => &self.queue_factory,
        }
    }

    pub fn close(&self) {
        self.topic_template.connection().close();
    }
}
