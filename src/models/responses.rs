//! Response DTOs for the status API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::stream::SubscriptionStatus;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStatsBody,
    /// Absent when no stream is configured
    pub stream: Option<SubscriptionStatus>,
}

/// Cache counters plus the derived hit rate.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsBody {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(stats: &CacheStats, stream: Option<SubscriptionStatus>) -> Self {
        Self {
            cache: CacheStatsBody {
                hits: stats.hits,
                misses: stats.misses,
                expirations: stats.expirations,
                evictions: stats.evictions,
                total_entries: stats.total_entries,
                hit_rate: stats.hit_rate(),
            },
            stream,
        }
    }
}

/// Response body for DELETE /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// The key that was invalidated
    pub key: String,
}

impl InvalidateResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' invalidated", key),
            key,
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    /// Entries held before the clear
    pub removed: usize,
}

impl ClearResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: "Cache cleared".to_string(),
            removed,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ConnectionState;

    #[test]
    fn test_stats_response_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            total_entries: 100,
            ..CacheStats::default()
        };
        let resp = StatsResponse::new(&stats, None);
        assert!((resp.cache.hit_rate - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_stats_response_serializes_stream_status() {
        let status = SubscriptionStatus {
            endpoint_address: "ws://localhost:9000".to_string(),
            state: ConnectionState::Backoff,
            last_error: Some("closed: stream ended".to_string()),
            retry_count: 2,
            retry_pending: true,
        };
        let resp = StatsResponse::new(&CacheStats::default(), Some(status));
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["stream"]["state"], "backoff");
        assert_eq!(json["stream"]["retry_count"], 2);
        assert_eq!(json["cache"]["hit_rate"], 0.0);
    }

    #[test]
    fn test_invalidate_response_serialize() {
        let resp = InvalidateResponse::new("quote:[\"AAPL\"]");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("invalidated"));
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
