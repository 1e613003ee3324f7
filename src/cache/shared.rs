//! Shared Cache Handle
//!
//! Cloneable handle over one [`CacheStore`], owned by the composing
//! application and passed explicitly to every collaborator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStats, CacheStore};
use crate::clock::Clock;
use crate::error::Result;

/// Thread-safe handle to a cache store.
///
/// The lock is held only for the duration of a single store call, so a
/// dispatcher handler may invalidate keys while another component is
/// mid-way through its own work.
pub struct SharedCache<V> {
    inner: Arc<Mutex<CacheStore<V>>>,
}

impl<V> Clone for SharedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> SharedCache<V> {
    pub fn new(store: CacheStore<V>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Unbounded cache on the given clock.
    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::new(CacheStore::with_clock(default_ttl, clock))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key)
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Result<()> {
        self.lock().set(key, value, ttl)
    }

    pub fn set_unbounded(&self, key: impl Into<String>, value: V) {
        self.lock().set_unbounded(key, value)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().invalidate(key)
    }

    pub fn invalidate_where(&self, pred: impl FnMut(&str) -> bool) -> usize {
        self.lock().invalidate_where(pred)
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn ttl_remaining(&self, key: &str) -> Option<Option<Duration>> {
        self.lock().ttl_remaining(key)
    }

    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired()
    }

    pub fn snapshot(&self) -> Vec<CacheEntry<V>> {
        self.lock().snapshot()
    }

    pub fn restore(&self, entries: impl IntoIterator<Item = CacheEntry<V>>) -> usize {
        self.lock().restore(entries)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CacheStore<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> std::fmt::Debug for SharedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache").finish_non_exhaustive()
    }
}
