//! Signaling WebSocket handler
//!
//! Every connection at `/api/ws` is one relay connection:
//! - inbound text frames are parsed as [`ClientMessage`] and routed
//! - the connection's outbound queue is drained to the socket in order
//! - a heartbeat ping keeps intermediaries from closing idle sockets
//!
//! However the loop ends, the connection is disconnected through the router.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::relay::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one signaling connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let relay = state.relay.clone();
    let (conn_id, mut outbound) = relay.connect();
    let mut shutdown = state.shutdown_signal();

    let heartbeat = state.config.get().relay.heartbeat_interval();
    let mut heartbeat_interval = tokio::time::interval(heartbeat);

    loop {
        tokio::select! {
            // Receive message from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_client_message(&text) {
                        Ok(msg) => relay.handle(&conn_id, msg),
                        Err(e) => warn!("Ignoring malformed frame from {}: {}", conn_id, e),
                    },
                    Some(Ok(Message::Ping(_))) => {
                        // axum answers pings automatically
                        debug!("Received ping from {}", conn_id);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} closed the socket", conn_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error on {}: {}", conn_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            // Relay traffic for this connection
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                match serialize_server_message(&msg) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            warn!("Failed to send to {}, disconnecting", conn_id);
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize message for {}: {}", conn_id, e),
                }
            }

            // Heartbeat
            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping to {}, disconnecting", conn_id);
                    break;
                }
            }

            _ = shutdown.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    relay.disconnect(&conn_id);
    info!("Signaling handler for {} exiting", conn_id);
}

fn parse_client_message(text: &str) -> serde_json::Result<ClientMessage> {
    serde_json::from_str(text)
}

fn serialize_server_message(msg: &ServerMessage) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Hello;

    #[test]
    fn test_parse_negotiation_frame() {
        let msg = parse_client_message(
            r#"{"type":"candidate","payload":{"to":"bcast1","payload":{"candidate":"c1"}}}"#,
        )
        .unwrap();

        match msg {
            ClientMessage::Candidate(signal) => {
                assert_eq!(signal.to, "bcast1");
                assert_eq!(signal.payload["candidate"], "c1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        assert!(parse_client_message("not json").is_err());
        assert!(parse_client_message(r#"{"type":"self-destruct"}"#).is_err());
        assert!(parse_client_message(r#"{"type":"offer","payload":{"sdp":"v=0"}}"#).is_err());
    }

    #[test]
    fn test_serialize_hello() {
        let json = serialize_server_message(&ServerMessage::Hello(Hello {
            connection_id: "abc".to_string(),
        }))
        .unwrap();
        assert_eq!(json, r#"{"type":"hello","payload":{"connectionId":"abc"}}"#);
    }
}
