//! Stream Cache - resilient streaming and response caching core
//!
//! An auto-reconnecting stream client that fans `{type, payload}` frames out
//! through an in-process dispatcher, and a TTL cache with a memoization
//! layer for expensive fetches such as upstream REST reads.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod stream;
pub mod tasks;
pub mod timer;
pub mod upstream;

pub use api::AppState;
pub use cache::{CacheStore, Memoizer, SharedCache};
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use stream::{ConnectionState, StreamClient};
pub use tasks::spawn_cleanup_task;
pub use upstream::UpstreamClient;
