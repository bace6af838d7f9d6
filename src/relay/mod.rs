//! Signaling and session relay
//!
//! Server side of live broadcasting:
//! - [`ConnectionRegistry`]: live connections and their room memberships
//! - [`StreamDirectory`]: active broadcast sessions, one per owning connection
//! - [`MessageRouter`]: routes directory events, negotiation messages and chat
//! - [`ChatDedupCache`]: suppresses identical chat payloads inside a short window
//!
//! ```text
//! broadcaster --start-session--> Router --> Directory
//!                                  |
//!                                  +--session-list-changed--> every connection
//!
//! viewer --offer{to}--> Router --offer{from}--> broadcaster
//! viewer <--answer{from}-- Router <--answer{to}-- broadcaster
//! ```

pub mod chat;
pub mod dedup;
pub mod directory;
pub mod protocol;
pub mod registry;
pub mod router;

pub use chat::{ChatMessage, ChatStore, DisplayNameResolver, IdentityResolver, NullChatStore};
pub use dedup::{ChatDedupCache, ChatDedupKey, DEFAULT_DEDUP_WINDOW};
pub use directory::{
    AccessDenied, MetadataPatch, SessionMetadata, SessionSummary, StartOutcome, StreamDirectory,
    StreamSession, UpdateOutcome, Visibility,
};
pub use protocol::{
    AccessRequest, AccessResult, ChatDelivery, ChatPayload, ClientMessage, Hello, InboundSignal,
    NegotiationKind, OutboundSignal, ServerMessage,
};
pub use registry::{ConnectionId, ConnectionRegistry, Outbound};
pub use router::MessageRouter;
