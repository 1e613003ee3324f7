//! API Module
//!
//! HTTP status surface for the composing application.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache statistics and stream status
//! - `DELETE /cache/:key` - Invalidate one cache key
//! - `DELETE /cache` - Clear the cache
//! - `GET /upstream/:resource` - Memoized read from the REST backend

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
