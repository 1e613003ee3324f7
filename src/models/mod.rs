//! Response models for the status API
//!
//! DTOs serialized into HTTP response bodies.

pub mod responses;

pub use responses::{
    CacheStatsBody, ClearResponse, HealthResponse, InvalidateResponse, StatsResponse,
};
