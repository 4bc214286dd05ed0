//! Huddle Server Library
//!
//! Session orchestration and signaling for multi-party rooms: tracks rooms,
//! participants and their media handles, and runs the WebSocket signaling
//! protocol that negotiates them. Exposed as a library for testing and
//! embedding.

pub mod engine;
pub mod error;
pub mod session;
pub mod state;
pub mod ws;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the application router over the given state.
pub fn create_app(state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
