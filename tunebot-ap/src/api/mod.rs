//! HTTP control API
//!
//! JSON endpoints for the chat front end plus an SSE stream of
//! `PlayerEvent`s.

pub mod handlers;
pub mod sse;

use crate::error::{Error, Result};
use crate::playback::PlaybackCoordinator;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub coordinator: PlaybackCoordinator,
}

/// Build the router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Session control
        .route("/sessions/:id/play", post(handlers::play))
        .route("/sessions/:id/enqueue", post(handlers::enqueue))
        .route("/sessions/:id/skip", post(handlers::skip))
        .route("/sessions/:id/clear", post(handlers::clear))
        .route("/sessions/:id/disconnect", post(handlers::disconnect))
        .route("/sessions/:id/queue", get(handlers::get_queue))
        .route("/sessions/:id/status", get(handlers::get_status))
        // Library
        .route("/sessions/:id/library", post(handlers::queue_library))
        .route("/library", get(handlers::list_library))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `port` until `shutdown` resolves
pub async fn run(port: u16, ctx: AppContext, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let app = create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
