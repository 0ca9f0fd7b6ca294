//! WebSocket transport for the live channel.
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket, send the setup descriptor, wait for
//!    the `setupComplete` acknowledgment
//! 2. `send()` - Stream outbound messages (audio, video, text turns)
//! 3. `take_incoming()` - Receive parsed server messages and lifecycle events
//! 4. `close()` - Clean shutdown
//!
//! A dropped or failed connection ends the session. There is no reconnect;
//! the failure is surfaced and the caller decides whether to open a fresh
//! session.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, ServerMessage};
use super::SessionError;
use crate::config::LiveConfig;

/// Connection timeout for the initial WebSocket handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for waiting for the setup acknowledgment
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// An inbound transport notification: a parsed message, or the reason the
/// stream ended.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(ServerMessage),
    Closed,
    Failed(String),
}

/// Handle to an open live channel.
///
/// Owns the WebSocket write half; inbound frames are parsed by a background
/// task and surfaced through the event receiver.
pub struct LiveTransport {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    /// Wrapped in Option so it can be taken for concurrent processing
    incoming: Option<mpsc::Receiver<TransportEvent>>,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl LiveTransport {
    /// Open the channel and complete the setup handshake.
    ///
    /// One attempt only: any failure here is terminal for this session.
    pub async fn connect(config: &LiveConfig) -> Result<Self, SessionError> {
        let request = config
            .ws_url()
            .into_client_request()
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        log::info!("connecting live channel to {}", config.endpoint);

        let (ws_stream, _response) = timeout(
            CONNECT_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| SessionError::ConnectFailed("connection timeout".to_string()))?
        .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let setup = serde_json::to_string(&ClientMessage::setup(config))
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| SessionError::HandshakeFailed(format!("setup send failed: {}", e)))?;

        log::info!("setup sent, waiting for acknowledgment");

        timeout(SETUP_TIMEOUT, async {
            while let Some(frame) = read.next().await {
                let message = frame.map_err(|e| SessionError::ConnectFailed(e.to_string()))?;
                if matches!(message, Message::Close(_)) {
                    return Err(SessionError::Closed(
                        "connection closed during setup".to_string(),
                    ));
                }
                match frame_json(&message) {
                    Some(Ok(msg)) => {
                        if let Some(error) = msg.error_message() {
                            return Err(SessionError::HandshakeFailed(error.to_string()));
                        }
                        if msg.is_setup_complete() {
                            return Ok(());
                        }
                        log::debug!("ignoring message while waiting for setup acknowledgment");
                    }
                    Some(Err(e)) => {
                        log::warn!("failed to parse message during setup: {}", e);
                    }
                    None => {} // ping/pong
                }
            }
            Err(SessionError::Closed("stream ended during setup".to_string()))
        })
        .await
        .map_err(|_| SessionError::HandshakeFailed("setup acknowledgment timeout".to_string()))??;

        log::info!("live channel open");

        let (incoming_tx, incoming_rx) = mpsc::channel(100);

        let receiver_task = tokio::spawn(async move {
            loop {
                let event = match read.next().await {
                    Some(Ok(message)) => match frame_json(&message) {
                        Some(Ok(msg)) => TransportEvent::Message(msg),
                        Some(Err(e)) => {
                            log::warn!("dropping unparseable server message: {}", e);
                            continue;
                        }
                        None => {
                            if matches!(message, Message::Close(_)) {
                                log::info!("live channel closed by server");
                                let _ = incoming_tx.send(TransportEvent::Closed).await;
                                break;
                            }
                            continue; // ping/pong
                        }
                    },
                    Some(Err(e)) => {
                        log::warn!("live channel error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Failed(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = incoming_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                };
                if incoming_tx.send(event).await.is_err() {
                    log::debug!("transport event receiver dropped");
                    break;
                }
            }
            log::debug!("receiver task exiting");
        });

        Ok(Self {
            write,
            incoming: Some(incoming_rx),
            receiver_task,
        })
    }

    /// Send a client message over the channel.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), SessionError> {
        let json =
            serde_json::to_string(msg).map_err(|e| SessionError::SendFailed(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))?;

        Ok(())
    }

    /// Take ownership of the inbound event receiver.
    ///
    /// Returns `None` if already taken.
    pub fn take_incoming(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.incoming.take()
    }

    /// Gracefully close the channel and stop the receiver task.
    pub async fn close(mut self) {
        log::info!("closing live channel");

        self.receiver_task.abort();

        if let Err(e) = self.write.close().await {
            log::debug!("error closing live channel: {}", e);
        }
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        // Ensure the receiver task stops if the transport is dropped without close()
        self.receiver_task.abort();
    }
}

/// JSON payload of a frame, if it carries one. The endpoint emits the same
/// JSON messages as either text or binary frames.
fn frame_json(message: &Message) -> Option<Result<ServerMessage, serde_json::Error>> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(text)),
        Message::Binary(bytes) => Some(serde_json::from_slice(bytes)),
        _ => None,
    }
}
