//! WebSocket connection from a client process to the relay
//!
//! The client is the orchestrator's [`SignalingSink`]. Inbound server messages are
//! handed to the orchestrator and re-published to local subscribers (directory and
//! chat views). Losing the socket tears the orchestrator down as if stopped.

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::relay::{AccessRequest, ChatPayload, ClientMessage, ServerMessage};
use crate::webrtc::{PeerOrchestrator, SignalingSink};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Server messages buffered per local subscriber
const EVENT_CAPACITY: usize = 256;

pub struct RelayClient {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    reader: Mutex<Option<WsReader>>,
    messages: broadcast::Sender<ServerMessage>,
    connection_id: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
}

impl RelayClient {
    /// Open the signaling socket at `url` (e.g. `ws://host:8080/api/ws`).
    /// Nothing is read until [`RelayClient::run`] is called.
    pub async fn connect(url: &str, heartbeat: Duration) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| AppError::Internal(format!("Relay connect to {} failed: {}", url, e)))?;
        info!("Connected to relay at {}", url);

        let (mut ws_write, ws_read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            loop {
                let msg = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    _ = ticker.tick() => ClientMessage::Ping,
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                match serde_json::to_string(&msg) {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            debug!("Relay socket closed while sending");
                            writer_cancel.cancel();
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize relay message: {}", e),
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let (messages, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            outbound,
            reader: Mutex::new(Some(ws_read)),
            messages,
            connection_id: Arc::new(Mutex::new(None)),
            cancel,
        }))
    }

    /// Start pumping server messages into `orchestrator`. The task ends when the socket
    /// closes or [`RelayClient::close`] is called, after tearing the orchestrator down.
    pub fn run(&self, orchestrator: Arc<PeerOrchestrator>) -> Result<JoinHandle<()>> {
        let mut reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| AppError::Internal("Relay client is already running".to_string()))?;

        let cancel = self.cancel.clone();
        let messages = self.messages.clone();
        let connection_id = self.connection_id.clone();

        Ok(tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = reader.next() => frame,
                };

                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Relay socket error: {}", e);
                        break;
                    }
                };

                let msg: ServerMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Ignoring malformed relay frame: {}", e);
                        continue;
                    }
                };

                if let ServerMessage::Hello(hello) = &msg {
                    debug!("Relay assigned connection id {}", hello.connection_id);
                    *connection_id.lock() = Some(hello.connection_id.clone());
                }

                // Subscribers observe a message only after the orchestrator has
                orchestrator.handle_server_message(msg.clone()).await;
                let _ = messages.send(msg);
            }

            cancel.cancel();
            *connection_id.lock() = None;
            orchestrator.handle_relay_disconnected().await;
        }))
    }

    /// Connection id assigned by the relay, once the greeting has arrived
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.lock().clone()
    }

    /// Every server message, including the ones the orchestrator consumes
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.messages.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn join_room(&self, room: &str) -> Result<()> {
        self.send(ClientMessage::JoinRoom(room.to_string()))
    }

    pub fn leave_room(&self, room: &str) -> Result<()> {
        self.send(ClientMessage::LeaveRoom(room.to_string()))
    }

    pub fn send_chat(&self, room: &str, sender: &str, content: &str) -> Result<()> {
        self.send(ClientMessage::Chat(ChatPayload {
            room: room.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }))
    }

    /// The answer arrives as an `access-result` message
    pub fn check_access(&self, session_id: &str, access_code: Option<&str>) -> Result<()> {
        self.send(ClientMessage::CheckAccess(AccessRequest {
            session_id: session_id.to_string(),
            access_code: access_code.map(str::to_string),
        }))
    }

    /// Close the socket; the orchestrator is torn down by the pump
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl SignalingSink for RelayClient {
    fn send(&self, msg: ClientMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::SignalingClosed);
        }
        self.outbound.send(msg).map_err(|_| AppError::SignalingClosed)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
