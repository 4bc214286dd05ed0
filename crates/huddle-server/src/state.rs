use std::sync::Arc;

use crate::engine::MediaEngine;
use crate::session::SessionRegistry;
use crate::ws::connections::ConnectionManager;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        Ok(Config { bind_address })
    }
}

/// Process-wide state injected into the signaling handler: the connection
/// registry and the session registry (which owns the media engine). No
/// module-level singletons; tests build their own.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub connections: Arc<ConnectionManager>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<dyn MediaEngine>) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let registry = Arc::new(SessionRegistry::new(engine, connections.clone()));

        Self {
            config,
            connections,
            registry,
        }
    }
}
