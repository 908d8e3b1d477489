use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use murmur_core::store::{ChatStore, MemoryStore};
use murmur_core::{ConnectionRegistry, Hub, PresenceGlue};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

use crate::config::ServerConfig;

mod routes;

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Hub,
    pub presence: PresenceGlue,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<dyn ChatStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let typing_expiry = Duration::from_millis(config.typing.expiry_ms);
        Self {
            hub: Hub::new(Arc::clone(&registry), Arc::clone(&store), typing_expiry),
            presence: PresenceGlue::new(Arc::clone(&registry), store),
            registry,
            config,
        }
    }
}

/// Start the HTTP/WebSocket server and run until Ctrl-C.
pub async fn start(config: ServerConfig) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind_addr))?;

    info!("Using in-memory chat store (development mode)");
    let state = Arc::new(AppState::new(config, Arc::new(MemoryStore::new())));

    let stop_token = CancellationToken::new();
    let sweeper = spawn_stale_sweeper(Arc::clone(&state), stop_token.child_token());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Bound HTTP listener");

    let app = create_router(state);

    info!("Starting Axum HTTP server on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stop_token.clone()))
        .await?;

    stop_token.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Stale connection sweeper did not stop cleanly");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(stop_token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
    stop_token.cancel();
}

/// Periodically drop registry entries whose writer has exited.
fn spawn_stale_sweeper(state: Arc<AppState>, stop_token: CancellationToken) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.registry.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop_token.cancelled() => break,
                _ = interval.tick() => {
                    sweep_stale(&state).await;
                }
            }
        }
    })
}

async fn sweep_stale(state: &AppState) -> usize {
    let removed = state.registry.cleanup_stale();
    if removed.is_empty() {
        return 0;
    }
    for identity in &removed {
        state.hub.connection_closed(identity);
    }
    state.presence.evicted(&removed).await
}

/// Create the Axum router with all routes
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .merge(routes::websocket::router())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "murmur-server",
            "version": env!("CARGO_PKG_VERSION"),
            "connections": state.registry.connection_count(),
        })),
    )
}
