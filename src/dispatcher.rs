//! Event Dispatcher
//!
//! In-process publish/subscribe keyed by event type. Stream events reach
//! collaborators through here without them touching the transport.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

/// Event handler. Returning `Err` or panicking is reported and contained.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

// == Subscription Handle ==
/// Identifies one registration for [`Dispatcher::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    event_type: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

// == Dispatcher ==
/// Cloneable handle to a shared handler registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<String, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    // == Subscribe ==
    /// Registers `handler` for `event_type`. Handlers run in registration order.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.lock()
            .entry(event_type.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(event_type = %event_type, id, "handler subscribed");

        SubscriptionHandle { event_type, id }
    }

    // == Unsubscribe ==
    /// Removes a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&handle.event_type) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != handle.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&handle.event_type);
        }
        removed
    }

    // == Publish ==
    /// Delivers `payload` to every handler registered for `event_type`.
    ///
    /// Handlers are snapshotted before the first one runs, so they may
    /// subscribe, unsubscribe, or publish reentrantly; registrations made
    /// during this publish only see later events. Returns how many handlers
    /// completed without error.
    pub fn publish(&self, event_type: &str, payload: &Value) -> usize {
        let snapshot: Vec<(u64, Handler)> = match self.lock().get(event_type) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut succeeded = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    warn!(event_type, id, error = %e, "event handler failed");
                }
                Err(panic) => {
                    warn!(
                        event_type,
                        id,
                        panic = panic_message(panic.as_ref()),
                        "event handler panicked"
                    );
                }
            }
        }
        succeeded
    }

    /// Number of handlers currently registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.lock().get(event_type).map(Vec::len).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(u64, Handler)>>> {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.lock();
        f.debug_struct("Dispatcher")
            .field("event_types", &handlers.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
