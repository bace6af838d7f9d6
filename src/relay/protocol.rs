//! Signaling protocol messages
//!
//! Frames are JSON objects of the form `{"type": "<event>", "payload": ...}` with
//! kebab-case event names. Negotiation payloads are opaque to the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::directory::{AccessDenied, MetadataPatch, SessionMetadata, SessionSummary};
use super::registry::ConnectionId;

/// Client-to-relay message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(String),
    LeaveRoom(String),
    StartSession(SessionMetadata),
    StopSession,
    UpdateMetadata(MetadataPatch),
    Offer(OutboundSignal),
    Answer(OutboundSignal),
    Candidate(OutboundSignal),
    Chat(ChatPayload),
    CheckAccess(AccessRequest),
    Ping,
}

impl ClientMessage {
    /// Build a negotiation message addressed to `to`
    pub fn negotiation(kind: NegotiationKind, to: impl Into<String>, payload: Value) -> Self {
        let signal = OutboundSignal {
            to: to.into(),
            from: None,
            payload,
        };
        match kind {
            NegotiationKind::Offer => ClientMessage::Offer(signal),
            NegotiationKind::Answer => ClientMessage::Answer(signal),
            NegotiationKind::Candidate => ClientMessage::Candidate(signal),
        }
    }
}

/// Relay-to-client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection
    Hello(Hello),
    /// Initial directory snapshot
    SessionList(Vec<SessionSummary>),
    /// Directory changed; replace the local view wholesale
    SessionListChanged(Vec<SessionSummary>),
    Offer(InboundSignal),
    Answer(InboundSignal),
    Candidate(InboundSignal),
    Chat(ChatDelivery),
    /// Same message as a previous `chat` with the sender's display name resolved
    ChatResolved(ChatDelivery),
    AccessResult(AccessResult),
    Pong,
}

impl ServerMessage {
    pub fn negotiation(kind: NegotiationKind, signal: InboundSignal) -> Self {
        match kind {
            NegotiationKind::Offer => ServerMessage::Offer(signal),
            NegotiationKind::Answer => ServerMessage::Answer(signal),
            NegotiationKind::Candidate => ServerMessage::Candidate(signal),
        }
    }
}

/// The three negotiation message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationKind {
    Offer,
    Answer,
    Candidate,
}

impl std::fmt::Display for NegotiationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationKind::Offer => write!(f, "offer"),
            NegotiationKind::Answer => write!(f, "answer"),
            NegotiationKind::Candidate => write!(f, "candidate"),
        }
    }
}

/// Negotiation message as sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSignal {
    pub to: ConnectionId,
    /// Whatever the client claims here is discarded by the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub payload: Value,
}

/// Negotiation message as delivered by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSignal {
    /// Stamped by the relay from the sending connection
    pub from: ConnectionId,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub room: String,
    pub sender: String,
    pub content: String,
    /// Milliseconds since the UNIX epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDelivery {
    /// Shared by the plain and resolved deliveries of one message
    pub id: String,
    pub room: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub session_id: ConnectionId,
    #[serde(default)]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResult {
    pub session_id: ConnectionId,
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AccessDenied>,
}
