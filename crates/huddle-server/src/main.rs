use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huddle_server::engine::inmem::InMemoryEngine;
use huddle_server::{create_app, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Huddle signaling server...");

    let config = state::Config::load()?;

    // The in-memory engine serves signaling-only deployments; a real SFU
    // backend plugs in through the same trait.
    let engine = Arc::new(InMemoryEngine::new());
    let app_state = state::AppState::new(config.clone(), engine);
    let registry = app_state.registry.clone();

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // All session state is ephemeral; close rooms explicitly on the way out.
    registry.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
