//! Cache Module
//!
//! In-memory TTL cache, key derivation, and the memoization layer built on top.

mod entry;
mod key;
mod lru;
mod memo;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use key::{write_canonical, CanonicalKeyDeriver, KeyDeriver, MAX_PASSTHROUGH_KEY_LEN};
pub use lru::LruTracker;
pub use memo::{Memoized, Memoizer};
pub use shared::SharedCache;
pub use stats::CacheStats;
pub use store::CacheStore;
