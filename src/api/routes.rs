//! API Routes
//!
//! Configures the Axum router with the status endpoints.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, health_handler, invalidate_handler, stats_handler, upstream_handler, AppState,
};

/// Creates the router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /stats` - Cache statistics and stream status
/// - `DELETE /cache/:key` - Invalidate one cache key
/// - `DELETE /cache` - Clear the cache
/// - `GET /upstream/:resource` - Memoized read from the REST backend
///
/// # Middleware
/// - CORS: Allows any origin (the dashboard is served from another origin)
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/cache", delete(clear_handler))
        .route("/cache/:key", delete(invalidate_handler))
        .route("/upstream/:resource", get(upstream_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
