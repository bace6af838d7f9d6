//! HTTP handlers for the read-only relay API

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::relay::{ChatMessage, SessionSummary, Visibility};
use crate::state::AppState;

/// Upper bound for `?limit=` on chat history
const MAX_HISTORY: u32 = 200;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub sessions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.relay.registry().len(),
        sessions: state.relay.directory().len(),
    })
}

/// Room-restricted sessions are only visible over the signaling channel
fn is_listed_publicly(summary: &SessionSummary) -> bool {
    summary.visibility == Visibility::Public
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let sessions = state
        .relay
        .directory()
        .summaries()
        .into_iter()
        .filter(is_listed_publicly)
        .collect();
    Json(sessions)
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>> {
    state
        .relay
        .directory()
        .get(&id)
        .map(|session| session.summary())
        .filter(is_listed_publicly)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub async fn room_chat_history(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, MAX_HISTORY);
    let messages = state.chat.recent_messages(&room, limit).await?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::relay::{ClientMessage, MessageRouter, SessionMetadata};
    use crate::storage::SqliteChatStore;
    use tempfile::tempdir;
    use tokio::sync::{broadcast, mpsc};

    async fn state(dir: &std::path::Path) -> Arc<AppState> {
        let config = ConfigStore::new(&dir.join("test.db")).await.unwrap();
        let chat = SqliteChatStore::new(config.pool().clone());
        let relay = Arc::new(MessageRouter::new(
            &config.get().relay,
            Arc::new(chat.clone()),
            Arc::new(chat.clone()),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        AppState::new(config, relay, chat, shutdown_tx, dir.to_path_buf())
    }

    fn start(
        state: &AppState,
        owner: &str,
        visibility: Visibility,
    ) -> mpsc::UnboundedReceiver<crate::relay::ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.relay.attach(owner, tx);
        state.relay.handle(
            owner,
            ClientMessage::StartSession(SessionMetadata {
                title: owner.to_string(),
                visibility,
                scope: Some("guild-42".to_string()),
                ..Default::default()
            }),
        );
        rx
    }

    #[tokio::test]
    async fn test_restricted_sessions_are_hidden_from_http() {
        let dir = tempdir().unwrap();
        let state = state(dir.path()).await;
        let _open = start(&state, "open", Visibility::Public);
        let _guild = start(&state, "guild", Visibility::RestrictedToRoom);

        let Json(list) = list_sessions(State(state.clone())).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "open");

        let Json(found) = get_session(State(state.clone()), Path("open".to_string()))
            .await
            .unwrap();
        assert_eq!(found.id, "open");

        let hidden = get_session(State(state.clone()), Path("guild".to_string())).await;
        assert!(matches!(hidden, Err(AppError::NotFound(_))));
        assert!(state.relay.directory().get("guild").is_some());
    }
}
