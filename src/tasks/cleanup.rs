//! Expiry Sweep Task
//!
//! Background task that periodically purges expired cache entries. Reads
//! already expire lazily; the sweep bounds memory held by keys nobody reads.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::SharedCache;

/// Spawns a background task that purges expired entries every `interval`.
///
/// The returned JoinHandle can be aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache: SharedCache<Value> = SharedCache::new(CacheStore::new(Duration::from_secs(300)));
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task<V>(cache: SharedCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "starting cache expiry sweep"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired();
            if removed > 0 {
                info!(removed, "expiry sweep removed entries");
            } else {
                debug!("expiry sweep found nothing to remove");
            }
        }
    })
}
