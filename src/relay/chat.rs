//! External chat collaborators
//!
//! The relay persists chat messages and resolves friendly sender names through these
//! traits. Both are called off the routing path; their failures never gate delivery.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// A chat message accepted by the relay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room: String,
    pub sender: String,
    pub content: String,
    /// Milliseconds since the UNIX epoch
    pub timestamp: i64,
}

/// Chat history persistence
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn save_chat_message(&self, message: &ChatMessage) -> Result<()>;
}

/// Friendly-name lookup for chat senders
#[async_trait]
pub trait DisplayNameResolver: Send + Sync {
    /// Returns the display name, or `sender` itself when none is known
    async fn resolve_display_name(&self, sender: &str) -> String;
}

/// Store that keeps nothing
pub struct NullChatStore;

#[async_trait]
impl ChatStore for NullChatStore {
    async fn save_chat_message(&self, _message: &ChatMessage) -> Result<()> {
        Ok(())
    }
}

/// Resolver that echoes the sender id
pub struct IdentityResolver;

#[async_trait]
impl DisplayNameResolver for IdentityResolver {
    async fn resolve_display_name(&self, sender: &str) -> String {
        sender.to_string()
    }
}
