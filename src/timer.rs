//! Timer Module
//!
//! Scheduling primitive used by the stream client for reconnect backoff.
//!
//! A [`TimerHandle`] owns a cancellation flag that the scheduled task checks
//! right before running, so a cancelled handle never fires even if the
//! underlying sleep has already elapsed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

/// A unit of deferred work.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

// == Timer Trait ==
/// Schedules deferred work.
pub trait Timer: Send + Sync + 'static {
    /// Runs `task` once after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

// == Timer Handle ==
/// Handle to a scheduled task.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    /// Cancels the task. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// == Tokio Timer ==
/// Timer backed by `tokio::time::sleep` on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

// == Manual Timer ==
/// Timer that records scheduled tasks and runs them only on request.
///
/// Used to drive reconnect logic step by step without real sleeps.
#[derive(Clone, Default)]
pub struct ManualTimer {
    scheduled: Arc<Mutex<Vec<Scheduled>>>,
}

struct Scheduled {
    delay: Duration,
    cancelled: Arc<AtomicBool>,
    task: Option<TimerTask>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of every task ever scheduled, in scheduling order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.lock().iter().map(|s| s.delay).collect()
    }

    /// Number of tasks ever scheduled.
    pub fn scheduled_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of tasks that are neither fired nor cancelled.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.task.is_some() && !s.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Whether the task at `index` was cancelled.
    pub fn is_cancelled(&self, index: usize) -> bool {
        self.lock()
            .get(index)
            .map(|s| s.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Fires the task at `index` if it is still pending. Returns whether it ran.
    pub fn fire(&self, index: usize) -> bool {
        let task = {
            let mut scheduled = self.lock();
            match scheduled.get_mut(index) {
                Some(s) if !s.cancelled.load(Ordering::SeqCst) => s.task.take(),
                _ => None,
            }
        };

        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs the task at `index` even if it was cancelled.
    ///
    /// Simulates a timer that elapsed concurrently with its cancellation.
    pub fn force_fire(&self, index: usize) -> bool {
        let task = self.lock().get_mut(index).and_then(|s| s.task.take());
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Fires the most recently scheduled task if still pending.
    pub fn fire_latest(&self) -> bool {
        let count = self.scheduled_count();
        count > 0 && self.fire(count - 1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Scheduled>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.lock().push(Scheduled {
            delay,
            cancelled: Arc::clone(&cancelled),
            task: Some(task),
        });
        TimerHandle::new(cancelled, None)
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimer")
            .field("scheduled", &self.scheduled_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_fires_after_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let _handle = TokioTimer.schedule(Duration::from_secs(2), counting_task(&counter));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_cancelled_never_fires() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = TokioTimer.schedule(Duration::from_secs(1), counting_task(&counter));

        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(handle.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_timer_fire_runs_once() {
        let timer = ManualTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        timer.schedule(Duration::from_millis(10), counting_task(&counter));

        assert_eq!(timer.pending_count(), 1);
        assert!(timer.fire(0));
        assert!(!timer.fire(0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_count(), 0);
    }

    #[test]
    fn test_manual_timer_cancelled_task_does_not_fire() {
        let timer = ManualTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = timer.schedule(Duration::from_millis(10), counting_task(&counter));

        handle.cancel();

        assert!(timer.is_cancelled(0));
        assert!(!timer.fire(0));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_timer_records_delays_in_order() {
        let timer = ManualTimer::new();
        timer.schedule(Duration::from_millis(5), Box::new(|| {}));
        timer.schedule(Duration::from_millis(7), Box::new(|| {}));

        assert_eq!(
            timer.scheduled_delays(),
            vec![Duration::from_millis(5), Duration::from_millis(7)]
        );
        assert!(timer.fire_latest());
        assert_eq!(timer.pending_count(), 1);
    }
}
