use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

/// Represents a WebSocket session connected to the broker.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for the session, generated per connection.
    pub id: String,

    /// Durable identity announced in the `connect` frame. At most one
    /// session per identity may be connected at a time.
    pub client_id: Option<String>,

    /// Channel to send WebSocket messages to the client.
    pub sender: UnboundedSender<WsMessage>,
}

impl Client {
    /// Create a new anonymous session with a sender channel.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            client_id: None,
            sender,
        }
    }

    /// Binds the session to a durable identity.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
