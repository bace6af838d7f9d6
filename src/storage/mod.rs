//! SQLite-backed collaborators for the relay

mod chat;

pub use chat::SqliteChatStore;
