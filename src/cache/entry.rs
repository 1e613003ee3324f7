//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// A single cached value with its creation time and lifetime.
///
/// Serializes as `{key, value, createdAt, ttl}` with `ttl` in whole
/// milliseconds, rounded up so a bounded TTL never serializes as zero
/// (`null` when unbounded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    /// Key the entry is stored under
    pub key: String,
    /// The stored value
    pub value: V,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// Lifetime, None = never expires
    #[serde(with = "ttl_millis")]
    pub ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry written at `created_at`.
    pub fn new(key: String, value: V, created_at: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        Self {
            key,
            value,
            created_at,
            ttl,
        }
    }

    // == Expires At ==
    /// Instant at which the entry stops being valid, None if unbounded.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl.map(|ttl| match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self
                .created_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Err(_) => DateTime::<Utc>::MAX_UTC,
        })
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is valid only while `now < created_at + ttl`,
    /// so it is already expired at exactly `created_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Remaining lifetime at `now`; `Some(ZERO)` once expired, None if unbounded.
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|expires| (expires - now).to_std().unwrap_or(Duration::ZERO))
    }
}

mod ttl_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(ttl) => {
                let millis = ttl.as_nanos().div_ceil(1_000_000);
                s.serialize_some(&u64::try_from(millis).unwrap_or(u64::MAX))
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_entry_no_ttl_never_expires() {
        let entry = CacheEntry::new("k".into(), 1, at(0), None);

        assert!(entry.expires_at().is_none());
        assert!(!entry.is_expired(at(1_000_000)));
        assert!(entry.ttl_remaining(at(5)).is_none());
    }

    #[test]
    fn test_entry_valid_before_ttl() {
        let entry = CacheEntry::new("k".into(), 1, at(0), Some(Duration::from_secs(10)));

        assert!(!entry.is_expired(at(9)));
        assert_eq!(entry.ttl_remaining(at(4)), Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new("k".into(), 1, at(0), Some(Duration::from_secs(10)));

        assert!(entry.is_expired(at(10)), "Entry should be expired at boundary");
        assert_eq!(entry.ttl_remaining(at(12)), Some(Duration::ZERO));
    }

    #[test]
    fn test_entry_serialized_shape() {
        let entry = CacheEntry::new(
            "quotes:[]".to_string(),
            json!({"bid": 1}),
            at(0),
            Some(Duration::from_millis(2500)),
        );

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["key"], "quotes:[]");
        assert_eq!(value["value"], json!({"bid": 1}));
        assert_eq!(value["ttl"], 2500);
        assert!(value["createdAt"].is_string());

        let back: CacheEntry<serde_json::Value> = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_entry_sub_millisecond_ttl_rounds_up() {
        for (ttl, millis) in [
            (Duration::from_micros(500), 1),
            (Duration::from_micros(1500), 2),
            (Duration::from_millis(3), 3),
        ] {
            let entry = CacheEntry::new("k".to_string(), 1, at(0), Some(ttl));
            let value = serde_json::to_value(&entry).unwrap();
            assert_eq!(value["ttl"], millis);

            let back: CacheEntry<i32> = serde_json::from_value(value).unwrap();
            let restored = back.ttl.unwrap();
            assert!(!restored.is_zero());
            assert!(restored >= ttl);
        }
    }

    #[test]
    fn test_entry_unbounded_ttl_serializes_null() {
        let entry = CacheEntry::new("k".to_string(), "v".to_string(), at(0), None);
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value["ttl"].is_null());
    }
}
