//! Cache Statistics Module
//!
//! Counters for cache lookups, lazy expirations, and capacity evictions.

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that returned nothing (unknown or expired key)
    pub misses: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Entries dropped to respect the optional capacity cap
    pub evictions: u64,
    /// Entries currently stored
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}
