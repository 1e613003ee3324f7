//! Error types for the stream and cache core
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by the cache store and key derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// TTL must be strictly positive
    #[error("Invalid TTL for key '{0}': must be greater than zero")]
    InvalidTtl(String),

    /// Arguments could not be turned into a cache key
    #[error("Key derivation failed for '{operation}': {reason}")]
    KeyDerivation { operation: String, reason: String },
}

// == Memoize Error Enum ==
/// Failure of a memoized call.
///
/// The fetch error is carried as-is so callers can match on their own type.
#[derive(Error, Debug)]
pub enum MemoizeError<E> {
    /// The wrapped operation failed; nothing was cached
    #[error("Fetch failed: {0}")]
    Fetch(E),

    /// The cache rejected the key or the result
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl<E> MemoizeError<E> {
    /// Returns the fetch error, if this is one.
    pub fn into_fetch(self) -> Option<E> {
        match self {
            MemoizeError::Fetch(e) => Some(e),
            MemoizeError::Cache(_) => None,
        }
    }
}

// == Transport Error Enum ==
/// Connection-level failures. Never returned to callers; they drive backoff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Transport error: {0}")]
    Io(String),
}

// == Parse Error ==
/// Inbound frame that is not a valid `{type, payload}` envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed frame: {reason}")]
pub struct ParseError {
    pub reason: String,
}

// == Stream Error Enum ==
/// Errors returned from stream client calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The client has no open connection
    #[error("Stream is not connected")]
    NotConnected,

    /// Outbound payload could not be encoded
    #[error("Failed to encode frame: {0}")]
    Encode(String),

    /// The transport refused the frame
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// == Config Error Enum ==
/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// == Upstream Error Enum ==
/// Failures of a REST request to the upstream backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream request failed: {0}")]
    Request(String),

    #[error("Upstream returned status {0}")]
    Status(u16),

    #[error("Upstream response is not JSON: {0}")]
    Decode(String),
}

// == API Error Enum ==
/// Errors surfaced by the HTTP status API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Key not present in the cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// No upstream backend is configured
    #[error("Upstream is not configured")]
    UpstreamDisabled,

    /// The upstream request failed; nothing was cached
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The cache rejected the response
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<MemoizeError<UpstreamError>> for ApiError {
    fn from(err: MemoizeError<UpstreamError>) -> Self {
        match err {
            MemoizeError::Fetch(e) => ApiError::Upstream(e),
            MemoizeError::Cache(e) => ApiError::Cache(e),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UpstreamDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memoize_error_keeps_fetch_error() {
        let err: MemoizeError<&str> = MemoizeError::Fetch("boom");
        assert_eq!(err.to_string(), "Fetch failed: boom");
        assert_eq!(err.into_fetch(), Some("boom"));
    }

    #[test]
    fn test_memoize_error_from_cache_error() {
        let err: MemoizeError<String> = CacheError::InvalidTtl("k".into()).into();
        assert!(matches!(err, MemoizeError::Cache(CacheError::InvalidTtl(_))));
        assert!(err.into_fetch().is_none());
    }

    #[test]
    fn test_api_error_not_found_status() {
        let response = ApiError::NotFound("k".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_api_error_from_failed_fetch_is_bad_gateway() {
        let err: ApiError = MemoizeError::Fetch(UpstreamError::Status(500)).into();
        assert!(matches!(err, ApiError::Upstream(UpstreamError::Status(500))));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::UpstreamDisabled.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
