use huddle_protocol::{ServerEnvelope, ServerMessage};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Registry of live connections: connection id -> outbound message channel.
///
/// Rooms fan out broadcasts through this registry so a participant's
/// membership lives in exactly one place (the room). Sends are
/// fire-and-forget; a failed send means the connection is going away and
/// its own cleanup path will run.
pub struct ConnectionManager {
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_connection(
        &self,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.senders.write().await.insert(connection_id, sender);
        tracing::debug!("Connection {} registered", connection_id);
    }

    pub async fn remove_connection(&self, connection_id: Uuid) {
        self.senders.write().await.remove(&connection_id);
        tracing::debug!("Connection {} removed", connection_id);
    }

    /// Sends a server-initiated message (no correlation id).
    pub async fn send_to_connection(&self, connection_id: Uuid, message: &ServerMessage) {
        let envelope = ServerEnvelope::broadcast(message.clone());
        let json = match serde_json::to_string(&envelope) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };
        self.send_raw(connection_id, json).await;
    }

    /// Sends pre-serialized JSON, used by room broadcasts to serialize once
    /// per fan-out.
    pub async fn send_raw(&self, connection_id: Uuid, json: String) {
        let senders = self.senders.read().await;
        if let Some(sender) = senders.get(&connection_id) {
            if let Err(e) = sender.send(json) {
                tracing::debug!("Failed to send to {} (disconnected): {}", connection_id, e);
            }
        }
    }

    /// Fans out one message to many connections with a single serialization.
    pub async fn send_to_many(&self, connection_ids: &[Uuid], message: &ServerMessage) {
        let envelope = ServerEnvelope::broadcast(message.clone());
        let json = match serde_json::to_string(&envelope) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };
        let senders = self.senders.read().await;
        for connection_id in connection_ids {
            if let Some(sender) = senders.get(connection_id) {
                if let Err(e) = sender.send(json.clone()) {
                    tracing::debug!("Failed to send to {} (disconnected): {}", connection_id, e);
                }
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
