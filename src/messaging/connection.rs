//! Broker connection
//!
//! `ConnectionFactory` holds the validated broker URL and timeouts and opens
//! `Connection`s. A connection owns one WebSocket split into two tasks:
//! - the writer drains an outbound channel onto the socket
//! - the reader resolves request receipts and dispatches deliveries, each on
//!   its own task, to the handler registered for the destination
//!
//! Requests (publish, subscribe, unsubscribe) carry an id and complete when
//! the broker answers with a receipt or an error, or when the timeout elapses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use crate::broker::DestinationKind;
use crate::config::{BrokerSettings, validate_broker_url};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::{Error, HandlerError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// A message handed to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub destination: String,
    pub kind: DestinationKind,
    pub payload: String,
    pub message_id: String,
    pub timestamp: i64,
}

/// Callback invoked for every delivery on the destination it is bound to.
/// Returning an error leaves a queue message unacknowledged.
pub type MessageHandler =
    Arc<dyn Fn(Delivery) -> std::result::Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    url: Url,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ConnectionFactory {
    pub fn new(broker_url: &str) -> Result<Self> {
        Ok(Self {
            url: validate_broker_url(broker_url)?,
            connect_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn from_settings(settings: &BrokerSettings) -> Result<Self> {
        Ok(Self::new(&settings.url)?.with_timeouts(
            Duration::from_millis(settings.connect_timeout_ms),
            Duration::from_millis(settings.request_timeout_ms),
        ))
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn broker_url(&self) -> &Url {
        &self.url
    }

    /// Opens a connection and performs the `connect` handshake, announcing
    /// `client_id` as the durable identity when given.
    pub async fn connect(&self, client_id: Option<&str>) -> Result<Connection> {
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::Timeout(millis(self.connect_timeout)))?
            .map_err(|source| Error::Connection {
                url: self.url.to_string(),
                source,
            })?;
        let (mut sink, mut stream) = ws.split();

        let hello = ClientMessage::Connect {
            client_id: client_id.map(str::to_string),
        };
        sink.send(WsMessage::text(serde_json::to_string(&hello)?))
            .await
            .map_err(|source| Error::Connection {
                url: self.url.to_string(),
                source,
            })?;

        let session_id = tokio::time::timeout(self.connect_timeout, await_connected(&mut stream))
            .await
            .map_err(|_| Error::Timeout(millis(self.connect_timeout)))??;

        info!(url = %self.url, session = %session_id, client_id = ?client_id, "connected to broker");
        Ok(Connection::spawn(
            sink,
            stream,
            session_id,
            client_id.map(str::to_string),
            self.request_timeout,
        ))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn await_connected(stream: &mut SplitStream<WsStream>) -> Result<String> {
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|_| Error::Disconnected)?;
        if frame.is_close() {
            break;
        }
        if !frame.is_text() {
            continue;
        }
        let Ok(text) = frame.to_text() else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(text)? {
            ServerMessage::Connected { session_id } => return Ok(session_id),
            ServerMessage::Error { message, .. } => return Err(Error::Rejected(message)),
            other => debug!(?other, "ignoring frame before handshake"),
        }
    }
    Err(Error::Disconnected)
}

enum Outbound {
    Frame(ClientMessage),
    Close,
}

struct Shared {
    session_id: String,
    client_id: Option<String>,
    outbound: mpsc::UnboundedSender<Outbound>,
    handlers: Mutex<HashMap<(DestinationKind, String), MessageHandler>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<()>>>>,
    next_request_id: AtomicU64,
    open: AtomicBool,
    request_timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Marks the connection closed and fails every outstanding request.
    fn shut_down(&self) {
        self.open.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
    }
}

/// Handle to an open broker connection. Cheap to clone; all clones share the
/// same socket.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.shared.session_id)
            .field("client_id", &self.shared.client_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    fn spawn(
        sink: SplitSink<WsStream, WsMessage>,
        stream: SplitStream<WsStream>,
        session_id: String,
        client_id: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            session_id,
            client_id,
            outbound: tx,
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
            request_timeout,
        });

        // The loops only hold weak references so that dropping the last
        // handle closes the socket.
        tokio::spawn(write_loop(sink, rx, Arc::downgrade(&shared)));
        tokio::spawn(read_loop(stream, Arc::downgrade(&shared)));

        Self { shared }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn client_id(&self) -> Option<&str> {
        self.shared.client_id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Publishes `payload` and waits for the broker's receipt.
    pub async fn send(
        &self,
        destination: &str,
        kind: DestinationKind,
        payload: &str,
    ) -> Result<()> {
        if destination.is_empty() {
            return Err(Error::InvalidDestination);
        }
        self.request(|request_id| ClientMessage::Publish {
            request_id,
            destination: destination.to_string(),
            kind,
            payload: payload.to_string(),
        })
        .await
    }

    /// Binds `handler` to `destination` and waits until the broker confirms
    /// the subscription. Queue backlogs start flowing right away.
    pub async fn subscribe(
        &self,
        destination: &str,
        kind: DestinationKind,
        handler: MessageHandler,
    ) -> Result<()> {
        if destination.is_empty() {
            return Err(Error::InvalidDestination);
        }
        let key = (kind, destination.to_string());
        lock(&self.shared.handlers).insert(key.clone(), handler);

        let result = self
            .request(|request_id| ClientMessage::Subscribe {
                request_id,
                destination: destination.to_string(),
                kind,
            })
            .await;
        if result.is_err() {
            lock(&self.shared.handlers).remove(&key);
        }
        result
    }

    pub async fn unsubscribe(&self, destination: &str, kind: DestinationKind) -> Result<()> {
        lock(&self.shared.handlers).remove(&(kind, destination.to_string()));
        self.request(|request_id| ClientMessage::Unsubscribe {
            request_id,
            destination: destination.to_string(),
            kind,
        })
        .await
    }

    /// Closes the socket. Outstanding requests fail with `Disconnected`.
    pub fn close(&self) {
        if self.shared.open.load(Ordering::SeqCst) {
            let _ = self.shared.outbound.send(Outbound::Close);
        }
        self.shared.shut_down();
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Disconnected);
        }
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(request_id, tx);

        let sent = self.shared.outbound.send(Outbound::Frame(build(request_id)));
        // The reader may have shut down between the check above and the insert.
        if sent.is_err() || !self.is_open() {
            lock(&self.shared.pending).remove(&request_id);
            return Err(Error::Disconnected);
        }

        match tokio::time::timeout(self.shared.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                lock(&self.shared.pending).remove(&request_id);
                Err(Error::Timeout(millis(self.shared.request_timeout)))
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shared: Weak<Shared>,
) {
    while let Some(outbound) = rx.recv().await {
        let msg = match outbound {
            Outbound::Frame(msg) => msg,
            Outbound::Close => break,
        };
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize client message");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::text(json)).await {
            warn!(error = %e, "write to broker failed");
            if let Some(shared) = shared.upgrade() {
                shared.shut_down();
            }
            return;
        }
    }
    let _ = sink.close().await;
    debug!("writer closed");
}

async fn read_loop(mut stream: SplitStream<WsStream>, shared: Weak<Shared>) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "read from broker failed");
                break;
            }
        };
        if frame.is_close() {
            break;
        }
        if !frame.is_text() {
            continue;
        }
        let Ok(text) = frame.to_text() else {
            continue;
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => dispatch(&shared, msg),
            Err(e) => warn!(error = %e, "invalid frame from broker"),
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.shut_down();
        info!(session = %shared.session_id, "broker connection closed");
    }
}

fn dispatch(shared: &Arc<Shared>, msg: ServerMessage) {
    match msg {
        ServerMessage::Receipt { request_id } => {
            if let Some(tx) = lock(&shared.pending).remove(&request_id) {
                let _ = tx.send(Ok(()));
            }
        }
        ServerMessage::Error {
            message,
            request_id: Some(request_id),
        } => {
            if let Some(tx) = lock(&shared.pending).remove(&request_id) {
                let _ = tx.send(Err(Error::Broker(message)));
            }
        }
        ServerMessage::Error {
            message,
            request_id: None,
        } => warn!(session = %shared.session_id, %message, "broker reported an error"),
        ServerMessage::Message {
            destination,
            kind,
            payload,
            message_id,
            timestamp,
        } => {
            if !shared.open.load(Ordering::SeqCst) {
                return;
            }
            let handler = lock(&shared.handlers)
                .get(&(kind, destination.clone()))
                .cloned();
            let Some(handler) = handler else {
                warn!(%destination, %kind, "no handler bound, delivery ignored");
                return;
            };
            let delivery = Delivery {
                destination,
                kind,
                payload,
                message_id,
                timestamp,
            };
            let shared = shared.clone();
            tokio::spawn(async move {
                let message_id = delivery.message_id.clone();
                match handler(delivery) {
                    Ok(()) if kind == DestinationKind::Queue => {
                        let _ = shared
                            .outbound
                            .send(Outbound::Frame(ClientMessage::Ack { message_id }));
                    }
                    Ok(()) => {}
                    Err(e) => warn!(error = %e, %message_id, "delivery not acknowledged"),
                }
            });
        }
        ServerMessage::Connected { .. } => {}
    }
}
