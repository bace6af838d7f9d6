use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::relay::MessageRouter;
use crate::storage::SqliteChatStore;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Signaling relay; every WebSocket connection goes through it
    pub relay: Arc<MessageRouter>,
    /// Chat history (the relay writes, the HTTP API reads)
    pub chat: SqliteChatStore,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    /// Data directory path
    data_dir: PathBuf,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        relay: Arc<MessageRouter>,
        chat: SqliteChatStore,
        shutdown_tx: broadcast::Sender<()>,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            relay,
            chat,
            shutdown_tx,
            data_dir,
        })
    }

    /// Get data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
