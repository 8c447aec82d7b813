//! WebSocket transport
//!
//! Minimal WebSocket server that translates JSON frames into broker
//! operations:
//! - accept TCP/WebSocket connections
//! - require a `connect` frame first, then register a `Client` session
//! - forward subscribe/unsubscribe/publish/ack to the `Broker`
//! - answer every request with a receipt or an error carrying its request id

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::broker::{Broker, Message};
use crate::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::{Error, Result};

/// Binds `addr` and serves until the listener fails.
pub async fn start_websocket_server(addr: &str, broker: Arc<Mutex<Broker>>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, broker).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<Mutex<Broker>>) -> Result<()> {
    info!("WebSocket broker listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();
        tokio::spawn(async move {
            debug!(%peer, "accepted connection");
            handle_connection(stream, broker).await;
        });
    }
}

pub(crate) fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send(tx: &UnboundedSender<WsMessage>, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(WsMessage::text(json));
        }
        Err(e) => error!(error = %e, "failed to serialize server message"),
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Mutex<Broker>>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake error");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    // Forward broker → client until every sender is gone.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!(error = %e, "send loop closed");
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    let client_id = match read_connect(&mut ws_receiver).await {
        Some(Ok(client_id)) => client_id,
        Some(Err(reason)) => {
            send(&tx, &ServerMessage::error(reason));
            drop(tx);
            let _ = writer.await;
            return;
        }
        None => return,
    };

    let mut client = Client::new(tx.clone());
    if let Some(client_id) = client_id {
        client = client.with_client_id(client_id);
    }
    let session_id = client.id.clone();

    let registered = lock(&broker).register_client(client);
    if let Err(e) = registered {
        warn!(error = %e, "connection rejected");
        send(&tx, &ServerMessage::error(e.to_string()));
        drop(tx);
        let _ = writer.await;
        return;
    }
    send(
        &tx,
        &ServerMessage::Connected {
            session_id: session_id.clone(),
        },
    );

    while let Some(Ok(frame)) = ws_receiver.next().await {
        if frame.is_close() {
            break;
        }
        if !frame.is_text() {
            continue;
        }
        let Ok(text) = frame.to_text() else {
            continue;
        };
        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => handle_client_message(&broker, &session_id, msg),
            Err(err) => {
                warn!(session = %session_id, error = %err, "invalid client message");
                Some(ServerMessage::error(format!("invalid message: {err}")))
            }
        };
        if let Some(reply) = reply {
            send(&tx, &reply);
        }
    }

    lock(&broker).cleanup_client(&session_id);
    drop(tx);
    writer.abort();
    info!(session = %session_id, "disconnected");
}

/// Waits for the opening `connect` frame. `None` means the peer left first.
async fn read_connect<S>(receiver: &mut S) -> Option<std::result::Result<Option<String>, String>>
where
    S: Stream<Item = std::result::Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(Ok(frame)) = receiver.next().await {
        if frame.is_close() {
            return None;
        }
        if !frame.is_text() {
            continue;
        }
        let Ok(text) = frame.to_text() else {
            continue;
        };
        return Some(match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Connect { client_id }) => match client_id {
                Some(id) if id.trim().is_empty() => Err("client id must not be empty".to_string()),
                other => Ok(other),
            },
            _ => Err("must connect first".to_string()),
        });
    }
    None
}

/// Applies one client frame to the broker and returns the reply to send, if any.
pub(crate) fn handle_client_message(
    broker: &Mutex<Broker>,
    session_id: &str,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    let session = session_id.to_string();
    match msg {
        ClientMessage::Connect { .. } => Some(ServerMessage::error("already connected")),
        ClientMessage::Subscribe {
            request_id,
            destination,
            kind,
        } => {
            if destination.is_empty() {
                return Some(ServerMessage::request_error(
                    request_id,
                    Error::InvalidDestination.to_string(),
                ));
            }
            match lock(broker).subscribe(&destination, kind, session) {
                Ok(()) => {
                    info!(session = session_id, %destination, %kind, "subscribed");
                    Some(ServerMessage::Receipt { request_id })
                }
                Err(e) => Some(ServerMessage::request_error(request_id, e.to_string())),
            }
        }
        ClientMessage::Unsubscribe {
            request_id,
            destination,
            kind,
        } => {
            lock(broker).unsubscribe(&destination, kind, &session);
            info!(session = session_id, %destination, %kind, "unsubscribed");
            Some(ServerMessage::Receipt { request_id })
        }
        ClientMessage::Publish {
            request_id,
            destination,
            kind,
            payload,
        } => {
            if destination.is_empty() {
                return Some(ServerMessage::request_error(
                    request_id,
                    Error::InvalidDestination.to_string(),
                ));
            }
            let result = lock(broker).publish(Message::new(destination.clone(), kind, payload));
            match result {
                Ok(()) => {
                    debug!(session = session_id, %destination, %kind, "published");
                    Some(ServerMessage::Receipt { request_id })
                }
                Err(e) => Some(ServerMessage::request_error(request_id, e.to_string())),
            }
        }
        ClientMessage::Ack { message_id } => match lock(broker).handle_ack(&session, &message_id) {
            Ok(()) => None,
            Err(e) => Some(ServerMessage::error(e.to_string())),
        },
    }
}
