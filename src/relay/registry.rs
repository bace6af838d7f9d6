//! Connection registry
//!
//! Maps each live signaling connection to its outbound queue and room memberships.
//! Each connection has exactly one ordered outbound queue, so messages from one sender
//! to one recipient are delivered in the order they were routed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

use super::protocol::ServerMessage;

/// Opaque, transport-assigned connection identifier
pub type ConnectionId = String;

/// Sender half of a connection's outbound queue
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

struct Connection {
    tx: Outbound,
    rooms: HashSet<String>,
    connected_at: DateTime<Utc>,
}

/// Registry of live connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `false` if the id is already registered.
    pub fn register(&self, id: &str, tx: Outbound) -> bool {
        let mut connections = self.connections.write();
        if connections.contains_key(id) {
            debug!("Connection {} already registered", id);
            return false;
        }
        connections.insert(
            id.to_string(),
            Connection {
                tx,
                rooms: HashSet::new(),
                connected_at: Utc::now(),
            },
        );
        true
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &str) -> bool {
        self.connections.write().remove(id).is_some()
    }

    pub fn join_room(&self, id: &str, room: &str) -> bool {
        match self.connections.write().get_mut(id) {
            Some(conn) => conn.rooms.insert(room.to_string()),
            None => false,
        }
    }

    pub fn leave_room(&self, id: &str, room: &str) -> bool {
        match self.connections.write().get_mut(id) {
            Some(conn) => conn.rooms.remove(room),
            None => false,
        }
    }

    pub fn is_member(&self, id: &str, room: &str) -> bool {
        self.connections
            .read()
            .get(id)
            .is_some_and(|conn| conn.rooms.contains(room))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn connected_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.connections.read().get(id).map(|conn| conn.connected_at)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Queue a message for one connection. Returns `false` if it is not live.
    pub fn send_to(&self, id: &str, msg: ServerMessage) -> bool {
        match self.connections.read().get(id) {
            Some(conn) => conn.tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Queue a message for every connection; returns the number reached
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        self.connections
            .read()
            .values()
            .filter(|conn| conn.tx.send(msg.clone()).is_ok())
            .count()
    }

    /// Queue a message for every member of `room`; returns the number reached
    pub fn broadcast_room(&self, room: &str, msg: &ServerMessage) -> usize {
        self.connections
            .read()
            .values()
            .filter(|conn| conn.rooms.contains(room))
            .filter(|conn| conn.tx.send(msg.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(registry.register("c1", tx.clone()));
        assert!(!registry.register("c1", tx));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("c1"));
        assert!(!registry.unregister("c1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_room_broadcast_reaches_members_only() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("c1", tx1);
        registry.register("c2", tx2);

        assert!(registry.join_room("c1", "raid"));
        assert!(!registry.join_room("ghost", "raid"));
        assert!(registry.is_member("c1", "raid"));

        assert_eq!(registry.broadcast_room("raid", &ServerMessage::Pong), 1);
        assert!(matches!(rx1.try_recv(), Ok(ServerMessage::Pong)));
        assert!(rx2.try_recv().is_err());

        assert!(registry.leave_room("c1", "raid"));
        assert_eq!(registry.broadcast_room("raid", &ServerMessage::Pong), 0);
        assert_eq!(registry.broadcast(&ServerMessage::Pong), 2);
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to("missing", ServerMessage::Pong));
    }
}
