//! Cache Store Module
//!
//! Single-owner cache engine: HashMap storage with per-entry TTL, lazy
//! expiry on read, and an optional LRU capacity cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, LruTracker};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};

// == Cache Store ==
/// Key to entry map with TTL expiry.
///
/// Methods take `&mut self`; share it through [`crate::cache::SharedCache`].
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Recency tracking, present only when a capacity cap is set
    lru: Option<LruTracker>,
    /// Maximum number of entries, None = unbounded
    max_entries: Option<usize>,
    /// TTL applied when `set` is called without one
    default_ttl: Duration,
    stats: CacheStats,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> CacheStore<V> {
    // == Constructor ==
    /// Creates an unbounded store on the system clock.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    /// Creates an unbounded store reading time from `clock`.
    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: None,
            max_entries: None,
            default_ttl,
            stats: CacheStats::new(),
            clock,
        }
    }

    /// Caps the store at `max_entries`, evicting least recently used keys.
    ///
    /// A cap of zero leaves the store unbounded.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        if max_entries == 0 {
            self.max_entries = None;
            self.lru = None;
        } else {
            let mut lru = LruTracker::new();
            for key in self.entries.keys() {
                lru.touch(key);
            }
            self.max_entries = Some(max_entries);
            self.lru = Some(lru);
        }
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // == Get ==
    /// Returns the value if present and not expired.
    ///
    /// An expired entry is removed as a side effect and counted as a miss.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now();

        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.remove_entry(key);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                debug!(key, "cache entry expired");
                None
            }
            Some(entry) => {
                let value = entry.value.clone();
                self.stats.record_hit();
                if let Some(lru) = self.lru.as_mut() {
                    lru.touch(key);
                }
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Set ==
    /// Inserts or overwrites an entry, resetting its creation time.
    ///
    /// `ttl` of None uses the store default. A zero TTL is rejected with
    /// [`CacheError::InvalidTtl`] and the store is left untouched.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Result<()> {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(key));
        }
        self.insert(key, value, Some(ttl));
        Ok(())
    }

    // == Set Unbounded ==
    /// Inserts or overwrites an entry that never expires.
    pub fn set_unbounded(&mut self, key: impl Into<String>, value: V) {
        self.insert(key.into(), value, None);
    }

    // == Invalidate ==
    /// Removes an entry. Returns whether a valid one was present; never fails.
    pub fn invalidate(&mut self, key: &str) -> bool {
        let now = self.clock.now();
        let live = self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now));
        self.remove_entry(key);
        live
    }

    /// Removes every entry whose key matches `pred`. Returns how many were live.
    pub fn invalidate_where(&mut self, mut pred: impl FnMut(&str) -> bool) -> usize {
        let now = self.clock.now();
        let matched: Vec<(String, bool)> = self
            .entries
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(key, entry)| (key.clone(), !entry.is_expired(now)))
            .collect();

        let mut live = 0;
        for (key, is_live) in matched {
            self.remove_entry(&key);
            live += usize::from(is_live);
        }
        live
    }

    // == Clear ==
    /// Removes all entries. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        if let Some(lru) = self.lru.as_mut() {
            lru.clear();
        }
    }

    // == Contains ==
    /// True if `key` holds a valid entry. Does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    // == Remaining TTL ==
    /// Remaining lifetime of a valid entry; `Some(None)` means unbounded.
    pub fn ttl_remaining(&self, key: &str) -> Option<Option<Duration>> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.ttl_remaining(now))
    }

    // == Purge Expired ==
    /// Eagerly removes every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        self.stats.record_expirations(expired.len());
        expired.len()
    }

    // == Snapshot ==
    /// Copies every valid entry, e.g. for persisting to durable storage.
    pub fn snapshot(&self) -> Vec<CacheEntry<V>> {
        let now = self.clock.now();
        self.entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .cloned()
            .collect()
    }

    // == Restore ==
    /// Loads previously persisted entries, keeping their original timestamps.
    ///
    /// Every entry is re-checked against the clock; expired ones and ones
    /// with a zero TTL are skipped. Returns the number of entries loaded.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = CacheEntry<V>>) -> usize {
        let now = self.clock.now();
        let mut loaded = 0;

        for entry in entries {
            if entry.ttl.is_some_and(|ttl| ttl.is_zero()) || entry.is_expired(now) {
                debug!(key = %entry.key, "skipping stale persisted entry");
                continue;
            }
            self.make_room_for(&entry.key);
            if let Some(lru) = self.lru.as_mut() {
                lru.touch(&entry.key);
            }
            self.entries.insert(entry.key.clone(), entry);
            loaded += 1;
        }
        loaded
    }

    // == Stats ==
    /// Current counters with an up-to-date entry count.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.total_entries = self.entries.len();
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: String, value: V, ttl: Option<Duration>) {
        self.make_room_for(&key);
        if let Some(lru) = self.lru.as_mut() {
            lru.touch(&key);
        }
        let entry = CacheEntry::new(key.clone(), value, self.clock.now(), ttl);
        self.entries.insert(key, entry);
    }

    /// Makes room for a new key under the cap: expired entries go first, then
    /// the least recently used.
    fn make_room_for(&mut self, key: &str) {
        let Some(max) = self.max_entries else {
            return;
        };
        if self.entries.contains_key(key) {
            return;
        }
        if self.entries.len() >= max && self.purge_expired() > 0 {
            debug!("purged expired entries to make room");
        }
        while self.entries.len() >= max {
            let Some(evicted) = self.lru.as_mut().and_then(LruTracker::evict_oldest) else {
                break;
            };
            self.entries.remove(&evicted);
            self.stats.record_eviction();
            debug!(key = %evicted, "evicted least recently used entry");
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        if let Some(lru) = self.lru.as_mut() {
            lru.remove(key);
        }
        self.entries.remove(key).is_some()
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
