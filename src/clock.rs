//! Clock Module
//!
//! Wall-clock source used for cache entry timestamps and expiry checks.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

// == Clock Trait ==
/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

// == System Clock ==
/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// == Manual Clock ==
/// Clock that only moves when told to.
///
/// Cloned handles share the same instant, so a test can keep one handle
/// and hand another to the cache.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let by = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Pins the clock to an exact instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_is_frozen() {
        let clock = ManualClock::default();
        let first = clock.now();
        assert_eq!(clock.now(), first);
    }

    #[test]
    fn test_manual_clock_advance_shared_between_clones() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_millis(1500));

        assert_eq!(clock.now() - start, ChronoDuration::milliseconds(1500));
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
