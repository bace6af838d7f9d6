use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::error::Result;
use crate::relay::{ChatMessage, ChatStore, DisplayNameResolver};

/// Chat history and display names stored in the application database
///
/// Tables are created by [`crate::config::ConfigStore`].
#[derive(Clone)]
pub struct SqliteChatStore {
    pool: Pool<Sqlite>,
}

impl SqliteChatStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Most recent messages of a room, oldest first
    pub async fn recent_messages(&self, room: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, room, sender, content, timestamp FROM chat_messages
            WHERE room = ?1
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(room)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(id, room, sender, content, timestamp)| ChatMessage {
                id,
                room,
                sender,
                content,
                timestamp,
            })
            .collect())
    }

    pub async fn set_display_name(&self, sender: &str, display_name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO display_names (sender, display_name, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(sender) DO UPDATE SET display_name = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(sender)
        .bind(display_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn save_chat_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, room, sender, content, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&message.id)
        .bind(&message.room)
        .bind(&message.sender)
        .bind(&message.content)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DisplayNameResolver for SqliteChatStore {
    async fn resolve_display_name(&self, sender: &str) -> String {
        let row: std::result::Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT display_name FROM display_names WHERE sender = ?1")
                .bind(sender)
                .fetch_optional(&self.pool)
                .await;

        match row {
            Ok(Some((name,))) => name,
            Ok(None) => sender.to_string(),
            Err(e) => {
                debug!("Display name lookup for {} failed: {}", sender, e);
                sender.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    fn message(content: &str, timestamp: i64) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            room: "raid".to_string(),
            sender: "thrall".to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let dir = tempdir().unwrap();
        let config = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let store = SqliteChatStore::new(config.pool().clone());

        assert_ok!(store.save_chat_message(&message("first", 1)).await);
        assert_ok!(store.save_chat_message(&message("second", 2)).await);
        let third = message("third", 3);
        store.save_chat_message(&third).await.unwrap();

        let recent = store.recent_messages("raid", 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "third"]);
        assert_eq!(recent[1].id, third.id);
        assert!(store.recent_messages("pvp", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_display_name_falls_back_to_sender() {
        let dir = tempdir().unwrap();
        let config = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let store = SqliteChatStore::new(config.pool().clone());

        assert_eq!(store.resolve_display_name("thrall").await, "thrall");

        store.set_display_name("thrall", "Warchief Thrall").await.unwrap();
        assert_eq!(store.resolve_display_name("thrall").await, "Warchief Thrall");
    }
}
