use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::MediaEngine;
use crate::session::Room;
use crate::ws::connections::ConnectionManager;

/// Process-wide map of room id -> room.
///
/// Injected into the signaling handler at startup; lives for the process
/// lifetime and is torn down explicitly on shutdown.
pub struct SessionRegistry {
    engine: Arc<dyn MediaEngine>,
    connections: Arc<ConnectionManager>,
    rooms: RwLock<HashMap<String, Arc<RwLock<Room>>>>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            engine,
            connections,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the existing room or creates one.
    ///
    /// The map entry is inserted under the registry write lock, so concurrent
    /// first joins for the same id observe exactly one room. The engine call
    /// that provides the routing context runs after the registry lock drops,
    /// under the new room's own write lock: a late-arriving joiner of the
    /// same room waits for creation to settle, while lookups and every other
    /// room proceed unblocked. If the engine cannot provide a routing context
    /// the room keeps none (signaling-only degraded mode) rather than failing
    /// the join.
    pub async fn get_or_create_room(&self, room_id: &str) -> Arc<RwLock<Room>> {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let room = Arc::new(RwLock::new(Room::new(
            room_id.to_string(),
            None,
            self.connections.clone(),
        )));
        // Lock the new room before publishing it; the lock is uncontended
        // here, so this does not suspend while the registry lock is held.
        let mut creating = Arc::clone(&room).write_owned().await;
        rooms.insert(room_id.to_string(), room.clone());
        drop(rooms);

        match self.engine.create_routing_context().await {
            Ok(router) => creating.set_router(router),
            Err(e) => {
                tracing::warn!(
                    "Room {} created in signaling-only mode (no routing context): {}",
                    room_id,
                    e
                );
            }
        }
        drop(creating);
        tracing::info!("Created room {}", room_id);
        room
    }

    pub async fn room(&self, room_id: &str) -> Option<Arc<RwLock<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Deletes the room once its last participant is gone. Must run after
    /// every participant removal; skipping it leaks rooms indefinitely.
    pub async fn remove_room_if_empty(&self, room_id: &str) {
        let Some(room) = self.room(room_id).await else {
            return;
        };
        // Take the room lock before the registry lock: waiting for a busy
        // room (which may be mid engine call) must not hold up the registry.
        // The registry lock is never held across a suspension point, so this
        // nesting cannot deadlock.
        let mut guard = room.write().await;
        if !guard.is_empty() {
            return;
        }
        self.rooms.write().await.remove(room_id);
        guard.close().await;
        tracing::info!("Removed empty room {}", room_id);
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Closes every room. Called once at process shutdown.
    pub async fn shutdown(&self) {
        let rooms: Vec<_> = self.rooms.write().await.drain().collect();
        for (room_id, room) in rooms {
            room.write().await.close().await;
            tracing::info!("Closed room {} during shutdown", room_id);
        }
    }
}
