//! LRU Tracker Module
//!
//! Recency ordering for the optional capacity cap on the cache store.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks key recency with a monotonically increasing access stamp.
///
/// The smallest stamp in `order` is the least recently used key.
#[derive(Debug, Default)]
pub struct LruTracker {
    stamps: HashMap<String, u64>,
    order: BTreeMap<u64, String>,
    next: u64,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if new.
    pub fn touch(&mut self, key: &str) {
        let stamp = self.next;
        self.next += 1;

        if let Some(old) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.to_string());
    }

    // == Remove ==
    /// Stops tracking a key. No-op if unknown.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    // == Evict Oldest ==
    /// Removes and returns the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.stamps.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_in_insertion_order() {
        let mut lru = LruTracker::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");

        assert_eq!(lru.evict_oldest(), Some("a".to_string()));
        assert_eq!(lru.evict_oldest(), Some("b".to_string()));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_lru_touch_moves_to_front() {
        let mut lru = LruTracker::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.touch("a");

        assert_eq!(lru.evict_oldest(), Some("b".to_string()));
        assert_eq!(lru.evict_oldest(), Some("c".to_string()));
        assert_eq!(lru.evict_oldest(), Some("a".to_string()));
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_touch_same_key_keeps_single_entry() {
        let mut lru = LruTracker::new();
        lru.touch("k");
        lru.touch("k");
        lru.touch("k");

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some("k".to_string()));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_remove_and_clear() {
        let mut lru = LruTracker::new();
        lru.touch("a");
        lru.touch("b");

        lru.remove("a");
        lru.remove("missing");
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some("b".to_string()));

        lru.touch("c");
        lru.clear();
        assert!(lru.is_empty());
        assert_eq!(lru.evict_oldest(), None);
    }
}
