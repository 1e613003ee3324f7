//! Memoizer Module
//!
//! Wraps asynchronous operations so repeated calls with equivalent
//! arguments inside the TTL window are answered from the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::{CanonicalKeyDeriver, KeyDeriver, SharedCache};
use crate::error::{CacheError, MemoizeError};

type Gate = tokio::sync::Mutex<()>;

// == Memoizer ==
/// Cache-backed wrapper for fetch operations.
///
/// Failed fetches are never cached. By default concurrent misses on the
/// same key each run their own fetch; [`Memoizer::with_coalescing`] makes
/// them queue behind a single in-flight fetch instead.
pub struct Memoizer<V, K = CanonicalKeyDeriver> {
    cache: SharedCache<V>,
    deriver: K,
    in_flight: Option<Arc<InFlight>>,
}

impl<V: Clone> Memoizer<V> {
    /// Memoizer using the canonical JSON key deriver.
    pub fn new(cache: SharedCache<V>) -> Self {
        Self::with_deriver(cache, CanonicalKeyDeriver)
    }
}

impl<V: Clone, K: KeyDeriver> Memoizer<V, K> {
    pub fn with_deriver(cache: SharedCache<V>, deriver: K) -> Self {
        Self {
            cache,
            deriver,
            in_flight: None,
        }
    }

    /// Enables request coalescing: at most one fetch per key runs at a time.
    pub fn with_coalescing(mut self) -> Self {
        self.in_flight = Some(Arc::new(InFlight::default()));
        self
    }

    pub fn cache(&self) -> &SharedCache<V> {
        &self.cache
    }

    /// The key `call` would use for these arguments.
    pub fn key_for<A: Serialize + ?Sized>(
        &self,
        operation: &str,
        args: &A,
    ) -> Result<String, CacheError> {
        self.deriver.derive_from(operation, args)
    }

    // == Call ==
    /// Returns the cached result for `(operation, args)` or runs `fetch`.
    ///
    /// `ttl` of None uses the cache default.
    pub async fn call<A, F, Fut, E>(
        &self,
        operation: &str,
        args: &A,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<V, MemoizeError<E>>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = self.key_for(operation, args)?;
        self.call_with_key(&key, ttl, fetch).await
    }

    // == Call With Key ==
    /// Same as [`Memoizer::call`] with a caller-chosen key.
    pub async fn call_with_key<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<V, MemoizeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::InvalidTtl(key.to_string()).into());
        }

        if let Some(value) = self.cache.get(key) {
            debug!(key, "memoized hit");
            return Ok(value);
        }

        let _gate = match &self.in_flight {
            Some(in_flight) => {
                let guard = in_flight.gate(key).lock_owned().await;
                // another caller may have filled the key while we waited
                if let Some(value) = self.cache.get(key) {
                    debug!(key, "memoized hit after coalesced wait");
                    return Ok(value);
                }
                Some(guard)
            }
            None => None,
        };

        debug!(key, "memoized miss, fetching");
        let value = match fetch().await {
            Ok(value) => value,
            Err(e) => {
                debug!(key, "fetch failed, nothing cached");
                return Err(MemoizeError::Fetch(e));
            }
        };

        self.cache.set(key, value.clone(), ttl)?;
        Ok(value)
    }

    // == Wrap ==
    /// Turns `op` into a memoized function of its arguments.
    pub fn wrap<F>(&self, operation: impl Into<String>, ttl: Option<Duration>, op: F) -> Memoized<V, K, F>
    where
        K: Clone,
    {
        Memoized {
            memo: self.clone(),
            operation: operation.into(),
            ttl,
            op,
        }
    }
}

impl<V, K: Clone> Clone for Memoizer<V, K> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            deriver: self.deriver.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<V, K> std::fmt::Debug for Memoizer<V, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("coalescing", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

// == Memoized ==
/// A memoized operation produced by [`Memoizer::wrap`].
pub struct Memoized<V, K, F> {
    memo: Memoizer<V, K>,
    operation: String,
    ttl: Option<Duration>,
    op: F,
}

impl<V: Clone, K: KeyDeriver, F> Memoized<V, K, F> {
    pub async fn call<A, Fut, E>(&self, args: A) -> Result<V, MemoizeError<E>>
    where
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = self.memo.key_for(&self.operation, &args)?;
        self.memo
            .call_with_key(&key, self.ttl, || (self.op)(args))
            .await
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

// == In-Flight Table ==
/// Per-key gates for coalesced fetches. Entries die with their last waiter.
#[derive(Default)]
struct InFlight {
    gates: Mutex<HashMap<String, Weak<Gate>>>,
}

impl InFlight {
    fn gate(&self, key: &str) -> Arc<Gate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = gates.get(key).and_then(Weak::upgrade) {
            return gate;
        }
        gates.retain(|_, gate| gate.strong_count() > 0);
        let gate = Arc::new(Gate::new(()));
        gates.insert(key.to_string(), Arc::downgrade(&gate));
        gate
    }
}
