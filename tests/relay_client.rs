//! Relay client against a real server socket

mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;

use raidcast::client::RelayClient;
use raidcast::config::ConfigStore;
use raidcast::relay::{MessageRouter, ServerMessage};
use raidcast::state::AppState;
use raidcast::storage::SqliteChatStore;
use raidcast::web;
use raidcast::webrtc::PeerOrchestrator;

async fn next_matching<F>(rx: &mut broadcast::Receiver<ServerMessage>, mut pred: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    tokio::time::timeout(common::WAIT, async {
        loop {
            let msg = rx.recv().await.unwrap();
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("timed out waiting for server message")
}

#[tokio::test]
async fn test_client_round_trip_and_disconnect_cleanup() {
    let dir = tempdir().unwrap();
    let config = ConfigStore::new(&dir.path().join("relay.db")).await.unwrap();
    let chat = SqliteChatStore::new(config.pool().clone());
    let relay = Arc::new(MessageRouter::new(
        &config.get().relay,
        Arc::new(chat.clone()),
        Arc::new(chat.clone()),
    ));
    let (shutdown_tx, _) = broadcast::channel(1);
    let state = AppState::new(
        config,
        relay.clone(),
        chat.clone(),
        shutdown_tx,
        dir.path().to_path_buf(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, web::create_router(state)).await.unwrap();
    });

    let url = format!("ws://{}/api/ws", addr);
    let client = RelayClient::connect(&url, Duration::from_secs(30))
        .await
        .unwrap();
    let mut messages = client.subscribe();

    let factory = Arc::new(common::ScriptedFactory::default());
    let orchestrator = PeerOrchestrator::new(factory, client.clone(), Duration::from_secs(30));
    let pump = client.run(orchestrator.clone()).unwrap();
    assert!(client.run(orchestrator.clone()).is_err());

    let hello = next_matching(&mut messages, |m| matches!(m, ServerMessage::Hello(_))).await;
    let ServerMessage::Hello(hello) = hello else {
        unreachable!()
    };
    assert_eq!(client.connection_id(), Some(hello.connection_id.clone()));
    assert!(relay.registry().contains(&hello.connection_id));

    client.join_room("guild-42").unwrap();
    client.send_chat("guild-42", "thrall", "for the horde").unwrap();

    let plain = next_matching(&mut messages, |m| matches!(m, ServerMessage::Chat(_))).await;
    let resolved =
        next_matching(&mut messages, |m| matches!(m, ServerMessage::ChatResolved(_))).await;
    match (plain, resolved) {
        (ServerMessage::Chat(plain), ServerMessage::ChatResolved(resolved)) => {
            assert_eq!(plain.id, resolved.id);
            assert_eq!(resolved.sender_display_name.as_deref(), Some("thrall"));
        }
        other => panic!("unexpected messages: {:?}", other),
    }

    let store = chat.clone();
    common::eventually(|| {
        let store = store.clone();
        async move { store.recent_messages("guild-42", 10).await.unwrap().len() == 1 }
    })
    .await;

    client.close();
    tokio::time::timeout(common::WAIT, pump)
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_connected());
    assert!(client.join_room("guild-42").is_err());

    let relay_ref = relay.clone();
    common::eventually(|| {
        let relay = relay_ref.clone();
        async move { relay.registry().is_empty() }
    })
    .await;
}
