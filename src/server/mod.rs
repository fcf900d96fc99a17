//! Rendezvous server: the room hub over WebSocket

mod ws;

pub use ws::ws_handler;

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::signaling::RoomHub;

/// Shared server state
pub struct ServerState {
    pub hub: Arc<RoomHub>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub rooms: usize,
}

pub async fn health_check(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.hub.room_count(),
    })
}

/// Create the server router
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", any(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind the configured address
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    Ok(listener)
}

/// Serve the hub until `shutdown` completes
pub async fn serve<F>(listener: TcpListener, hub: Arc<RoomHub>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!("Rendezvous server listening on {}", local_addr);

    let app = create_router(Arc::new(ServerState { hub }));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Rendezvous server stopped");
    Ok(())
}
