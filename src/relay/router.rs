//! Message router (signaling relay)
//!
//! Every inbound event is attributed to the connection it arrived on. Identity fields
//! in payloads (`from`, session owner) are never trusted: the owner of a directory
//! mutation is always the sending connection, and negotiation messages are re-stamped
//! with the sender's id before being forwarded to exactly one recipient.
//!
//! Directory changes are fanned out to every connection as a full session list. That
//! is O(connections) per change, which is fine for the handful of live sessions a
//! guild runs at once.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::chat::{ChatMessage, ChatStore, DisplayNameResolver};
use super::dedup::{ChatDedupCache, ChatDedupKey};
use super::directory::{StreamDirectory, UpdateOutcome};
use super::protocol::{
    AccessRequest, AccessResult, ChatDelivery, ChatPayload, ClientMessage, Hello, InboundSignal,
    NegotiationKind, OutboundSignal, ServerMessage,
};
use super::registry::{ConnectionId, ConnectionRegistry, Outbound};
use crate::config::RelayConfig;

/// Signaling relay shared by all connections
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    directory: StreamDirectory,
    /// Serializes directory mutation + snapshot + fan-out so clients never observe
    /// an older list after a newer one. Chat and negotiation traffic never take it.
    directory_fanout: Mutex<()>,
    dedup: ChatDedupCache,
    chat_store: Arc<dyn ChatStore>,
    names: Arc<dyn DisplayNameResolver>,
    max_chat_length: usize,
}

impl MessageRouter {
    pub fn new(
        config: &RelayConfig,
        chat_store: Arc<dyn ChatStore>,
        names: Arc<dyn DisplayNameResolver>,
    ) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            directory: StreamDirectory::new(),
            directory_fanout: Mutex::new(()),
            dedup: ChatDedupCache::new(config.chat_dedup_window()),
            chat_store,
            names,
            max_chat_length: config.max_chat_length,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &StreamDirectory {
        &self.directory
    }

    /// Open a new connection with a fresh id
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(&id, tx);
        (id, rx)
    }

    /// Register `id` and push its greeting and directory snapshot.
    /// Returns `false` if the id is already live.
    pub fn attach(&self, id: &str, tx: Outbound) -> bool {
        let _fanout = self.directory_fanout.lock();

        if !self.registry.register(id, tx) {
            return false;
        }

        self.registry.send_to(
            id,
            ServerMessage::Hello(Hello {
                connection_id: id.to_string(),
            }),
        );

        let snapshot = self
            .directory
            .snapshot_for(id)
            .iter()
            .map(|session| session.summary())
            .collect();
        self.registry.send_to(id, ServerMessage::SessionList(snapshot));

        info!("Signaling connection opened: {}", id);
        true
    }

    /// Single cleanup path for explicit closes and transport failures alike.
    /// Calling it again for the same id has no further effect.
    pub fn disconnect(&self, id: &str) {
        let _fanout = self.directory_fanout.lock();

        if !self.registry.unregister(id) {
            debug!("Connection {} already disconnected", id);
            return;
        }
        info!("Signaling connection closed: {}", id);

        if self.directory.stop_session(id).is_some() {
            self.broadcast_directory();
        }
    }

    /// Route one event received on connection `from`
    pub fn handle(&self, from: &str, msg: ClientMessage) {
        if !self.registry.contains(from) {
            debug!("Ignoring event from unregistered connection {}", from);
            return;
        }

        match msg {
            ClientMessage::JoinRoom(room) => {
                if self.registry.join_room(from, &room) {
                    debug!("{} joined room {}", from, room);
                }
            }
            ClientMessage::LeaveRoom(room) => {
                if self.registry.leave_room(from, &room) {
                    debug!("{} left room {}", from, room);
                }
            }
            ClientMessage::StartSession(metadata) => {
                let _fanout = self.directory_fanout.lock();
                self.directory.start_session(from, metadata);
                self.broadcast_directory();
            }
            ClientMessage::StopSession => {
                let _fanout = self.directory_fanout.lock();
                if self.directory.stop_session(from).is_some() {
                    self.broadcast_directory();
                }
            }
            ClientMessage::UpdateMetadata(patch) => {
                let _fanout = self.directory_fanout.lock();
                let updated = self.directory.update_metadata(from, patch);
                if let Some((_, UpdateOutcome::Changed)) = updated {
                    self.broadcast_directory();
                }
            }
            ClientMessage::Offer(signal) => self.relay_negotiation(from, NegotiationKind::Offer, signal),
            ClientMessage::Answer(signal) => {
                self.relay_negotiation(from, NegotiationKind::Answer, signal)
            }
            ClientMessage::Candidate(signal) => {
                self.relay_negotiation(from, NegotiationKind::Candidate, signal)
            }
            ClientMessage::Chat(chat) => self.relay_chat(from, chat),
            ClientMessage::CheckAccess(request) => self.check_access(from, request),
            ClientMessage::Ping => {
                self.registry.send_to(from, ServerMessage::Pong);
            }
        }
    }

    /// Caller must hold `directory_fanout`
    fn broadcast_directory(&self) {
        let sessions = self.directory.summaries();
        let count = sessions.len();
        let reached = self
            .registry
            .broadcast(&ServerMessage::SessionListChanged(sessions));
        debug!(
            "Directory broadcast: {} sessions to {} connections",
            count, reached
        );
    }

    fn relay_negotiation(&self, from: &str, kind: NegotiationKind, signal: OutboundSignal) {
        if let Some(claimed) = signal.from.as_deref().filter(|claimed| *claimed != from) {
            debug!(
                "Overwriting claimed sender {:?} on {} from {}",
                claimed, kind, from
            );
        }

        let msg = ServerMessage::negotiation(
            kind,
            InboundSignal {
                from: from.to_string(),
                payload: signal.payload,
            },
        );

        if !self.registry.send_to(&signal.to, msg) {
            debug!(
                "Dropping {} from {}: recipient {} not connected",
                kind, from, signal.to
            );
        }
    }

    fn relay_chat(&self, from: &str, chat: ChatPayload) {
        if chat.content.trim().is_empty() {
            debug!("Dropping empty chat from {}", from);
            return;
        }
        if chat.content.chars().count() > self.max_chat_length {
            debug!("Dropping oversized chat from {} in {}", from, chat.room);
            return;
        }

        let key = ChatDedupKey::new(&chat.room, &chat.sender, &chat.content);
        if !self.dedup.check_and_insert(&key) {
            debug!("Suppressing duplicate chat from {} in {}", chat.sender, chat.room);
            return;
        }

        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            room: chat.room,
            sender: chat.sender,
            content: chat.content,
            timestamp: chat.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()),
        };

        let delivery = ChatDelivery {
            id: message.id.clone(),
            room: message.room.clone(),
            sender: message.sender.clone(),
            sender_display_name: None,
            content: message.content.clone(),
            timestamp: message.timestamp,
        };
        self.registry
            .broadcast_room(&message.room, &ServerMessage::Chat(delivery.clone()));

        let store = self.chat_store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_chat_message(&message).await {
                warn!("Failed to persist chat message {}: {}", message.id, e);
            }
        });

        // The resolved copy is a supersede of the plain delivery (same id), so every
        // room member sees each accepted message at least twice.
        let registry = self.registry.clone();
        let names = self.names.clone();
        tokio::spawn(async move {
            let name = names.resolve_display_name(&delivery.sender).await;
            let room = delivery.room.clone();
            let resolved = ChatDelivery {
                sender_display_name: Some(name),
                ..delivery
            };
            registry.broadcast_room(&room, &ServerMessage::ChatResolved(resolved));
        });
    }

    fn check_access(&self, from: &str, request: AccessRequest) {
        let decision = self.directory.check_access(
            &request.session_id,
            from,
            request.access_code.as_deref(),
            |room| self.registry.is_member(from, room),
        );

        if let Err(reason) = decision {
            debug!(
                "Access to {} denied for {}: {:?}",
                request.session_id, from, reason
            );
        }

        self.registry.send_to(
            from,
            ServerMessage::AccessResult(AccessResult {
                session_id: request.session_id,
                granted: decision.is_ok(),
                reason: decision.err(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::chat::{IdentityResolver, NullChatStore};
    use crate::relay::directory::{MetadataPatch, SessionMetadata, Visibility};
    use serde_json::json;

    fn router() -> MessageRouter {
        MessageRouter::new(
            &RelayConfig::default(),
            Arc::new(NullChatStore),
            Arc::new(IdentityResolver),
        )
    }

    fn open(router: &MessageRouter, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(router.attach(id, tx));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Hello(_))));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::SessionList(_))));
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = vec![];
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn raid_night() -> SessionMetadata {
        SessionMetadata {
            title: "Raid Night".to_string(),
            quality: "1080p".to_string(),
            fps: 60,
            visibility: Visibility::Public,
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_only_goes_to_new_connection() {
        let router = router();
        let mut a = open(&router, "a");
        router.handle("a", ClientMessage::StartSession(raid_night()));
        drain(&mut a);

        let (tx, mut b) = mpsc::unbounded_channel();
        router.attach("b", tx);
        let msgs = drain(&mut b);
        assert!(matches!(&msgs[1], ServerMessage::SessionList(list) if list.len() == 1));
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn test_start_session_broadcasts_to_all() {
        let router = router();
        let mut a = open(&router, "bcast1");
        let mut b = open(&router, "view1");

        router.handle("bcast1", ClientMessage::StartSession(raid_night()));

        for rx in [&mut a, &mut b] {
            match drain(rx).as_slice() {
                [ServerMessage::SessionListChanged(list)] => {
                    assert_eq!(list.len(), 1);
                    assert_eq!(list[0].id, "bcast1");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_foreign_update_is_ignored_silently() {
        let router = router();
        let mut a = open(&router, "a");
        let mut b = open(&router, "b");
        router.handle("a", ClientMessage::StartSession(raid_night()));
        drain(&mut a);
        drain(&mut b);
        let before = router.directory().get("a").unwrap();

        router.handle(
            "b",
            ClientMessage::UpdateMetadata(MetadataPatch {
                title: Some("pwned".to_string()),
                ..Default::default()
            }),
        );

        assert_eq!(router.directory().get("a").unwrap(), before);
        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_unchanged_update_is_not_broadcast() {
        let router = router();
        let mut a = open(&router, "a");
        let mut b = open(&router, "b");
        router.handle("a", ClientMessage::StartSession(raid_night()));
        drain(&mut a);
        drain(&mut b);

        let same_title = MetadataPatch {
            title: Some("Raid Night".to_string()),
            ..Default::default()
        };
        router.handle("a", ClientMessage::UpdateMetadata(same_title));
        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());

        let lower_fps = MetadataPatch {
            fps: Some(30),
            ..Default::default()
        };
        router.handle("a", ClientMessage::UpdateMetadata(lower_fps));
        match drain(&mut b).as_slice() {
            [ServerMessage::SessionListChanged(list)] => assert_eq!(list[0].fps, 30),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_negotiation_from_is_restamped() {
        let router = router();
        let mut bcast = open(&router, "bcast1");
        let _view = open(&router, "view1");

        router.handle(
            "view1",
            ClientMessage::Offer(OutboundSignal {
                to: "bcast1".to_string(),
                from: Some("someone-else".to_string()),
                payload: json!({"sdp": "v=0"}),
            }),
        );

        match drain(&mut bcast).as_slice() {
            [ServerMessage::Offer(signal)] => {
                assert_eq!(signal.from, "view1");
                assert_eq!(signal.payload, json!({"sdp": "v=0"}));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_negotiation_to_missing_recipient_is_dropped() {
        let router = router();
        let mut view = open(&router, "view1");

        router.handle(
            "view1",
            ClientMessage::negotiation(NegotiationKind::Candidate, "gone", json!({})),
        );
        assert!(drain(&mut view).is_empty());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let router = router();
        let _a = open(&router, "a");
        let mut b = open(&router, "b");
        router.handle("a", ClientMessage::StartSession(raid_night()));
        drain(&mut b);

        router.disconnect("a");
        router.disconnect("a");

        match drain(&mut b).as_slice() {
            [ServerMessage::SessionListChanged(list)] => assert!(list.is_empty()),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!router.registry().contains("a"));
    }

    #[test]
    fn test_events_from_unknown_connection_are_ignored() {
        let router = router();
        router.handle("ghost", ClientMessage::StartSession(raid_night()));
        assert!(router.directory().is_empty());
    }

    #[test]
    fn test_check_access_replies_to_caller_only() {
        let router = router();
        let mut owner = open(&router, "owner");
        let mut viewer = open(&router, "viewer");
        let mut meta = raid_night();
        meta.access_code = Some("pw".to_string());
        router.handle("owner", ClientMessage::StartSession(meta));
        drain(&mut owner);
        drain(&mut viewer);

        router.handle(
            "viewer",
            ClientMessage::CheckAccess(AccessRequest {
                session_id: "owner".to_string(),
                access_code: Some("wrong".to_string()),
            }),
        );

        match drain(&mut viewer).as_slice() {
            [ServerMessage::AccessResult(result)] => {
                assert!(!result.granted);
                assert!(result.reason.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(drain(&mut owner).is_empty());
    }

    #[tokio::test]
    async fn test_chat_delivered_then_superseded() {
        let router = router();
        let mut member = open(&router, "m");
        let mut outsider = open(&router, "o");
        router.handle("m", ClientMessage::JoinRoom("raid".to_string()));

        router.handle(
            "o",
            ClientMessage::Chat(ChatPayload {
                room: "raid".to_string(),
                sender: "thrall".to_string(),
                content: "pull in 10".to_string(),
                timestamp: Some(1_700_000_000_000),
            }),
        );

        let first = member.recv().await.unwrap();
        let second = member.recv().await.unwrap();
        let (ServerMessage::Chat(plain), ServerMessage::ChatResolved(resolved)) = (first, second)
        else {
            panic!("expected chat followed by chat-resolved");
        };
        assert_eq!(plain.id, resolved.id);
        assert_eq!(resolved.sender_display_name.as_deref(), Some("thrall"));
        assert!(drain(&mut outsider).is_empty());
    }

    #[tokio::test]
    async fn test_oversized_and_empty_chat_dropped() {
        let router = router();
        let mut member = open(&router, "m");
        router.handle("m", ClientMessage::JoinRoom("raid".to_string()));

        for content in ["   ".to_string(), "x".repeat(5000)] {
            router.handle(
                "m",
                ClientMessage::Chat(ChatPayload {
                    room: "raid".to_string(),
                    sender: "thrall".to_string(),
                    content,
                    timestamp: None,
                }),
            );
        }

        tokio::task::yield_now().await;
        assert!(drain(&mut member).is_empty());
    }
}
