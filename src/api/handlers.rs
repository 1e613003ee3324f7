//! API Handlers
//!
//! HTTP request handlers for the status endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheStore, SharedCache};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{ClearResponse, HealthResponse, InvalidateResponse, StatsResponse};
use crate::stream::StreamClient;
use crate::upstream::{self, UpstreamClient};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Response cache shared with the memoizer and stream handlers
    pub cache: SharedCache<Value>,
    /// Stream client, when a stream endpoint is configured
    pub stream: Option<StreamClient>,
    /// Memoized REST backend, when an upstream is configured
    pub upstream: Option<UpstreamClient>,
}

impl AppState {
    pub fn new(cache: SharedCache<Value>, stream: Option<StreamClient>) -> Self {
        Self {
            cache,
            stream,
            upstream: None,
        }
    }

    /// Builds a fresh cache, and the upstream client over it, from configuration.
    pub fn from_config(config: &Config, stream: Option<StreamClient>) -> Self {
        let store = CacheStore::new(config.default_ttl).with_max_entries(config.cache_max_entries);
        let cache = SharedCache::new(store);
        let upstream = UpstreamClient::from_config(config, cache.clone());
        Self {
            cache,
            stream,
            upstream,
        }
    }

    pub fn with_upstream(mut self, upstream: UpstreamClient) -> Self {
        self.upstream = Some(upstream);
        self
    }
}

/// Handler for GET /upstream/:resource
///
/// Proxies a JSON read to the upstream backend through the response cache.
pub async fn upstream_handler(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Query<upstream::Query>,
) -> Result<Json<Value>, ApiError> {
    let upstream = state.upstream.as_ref().ok_or(ApiError::UpstreamDisabled)?;
    let value = upstream.fetch(&resource, &query).await?;
    Ok(Json(value))
}

/// Handler for GET /stats
///
/// Cache counters and, when configured, the stream subscription status.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.stats();
    let stream = state.stream.as_ref().map(StreamClient::status);
    Json(StatsResponse::new(&stats, stream))
}

/// Handler for DELETE /cache/:key
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    if !state.cache.invalidate(&key) {
        return Err(ApiError::NotFound(key));
    }
    info!(key = %key, "cache entry invalidated via API");
    Ok(Json(InvalidateResponse::new(key)))
}

/// Handler for DELETE /cache
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let removed = state.cache.len();
    state.cache.clear();
    info!(removed, "cache cleared via API");
    Json(ClearResponse::new(removed))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
