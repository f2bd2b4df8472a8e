//! Clock & Timer Service.
//!
//! Abstracts wall-clock (IST) and steady time behind a `Clock` trait so
//! components can be driven deterministically in tests, and provides a
//! cancellable single-shot/periodic timer pool distinct from the ingress
//! paths that feed the Coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::task::AbortHandle;
use tracing::trace;

/// India Standard Time, UTC+5:30. No tz database dependency is pulled in
/// for a single fixed offset.
pub fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("IST offset is a valid fixed offset")
}

/// Wall-clock port. `SystemClock` is the production implementation;
/// `TestClock` lets scenario tests drive the fabric through exact tick
/// sequences without real sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ist(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&ist_offset())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually-advanced clock for deterministic tests.
#[derive(Clone)]
pub struct TestClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.inner.lock().expect("TestClock mutex poisoned");
        *guard += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().expect("TestClock mutex poisoned") = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("TestClock mutex poisoned")
    }
}

/// Opaque handle to a scheduled timer. `cancel` on an already-fired or
/// already-cancelled handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Pool that schedules single-shot and periodic callbacks on tasks
/// distinct from any ingress-draining task. Handlers must stay short —
/// broker I/O is offloaded elsewhere.
#[derive(Clone, Default)]
pub struct TimerService {
    next_id: Arc<AtomicU64>,
    handles: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run once after `duration`.
    pub fn schedule_once<F>(&self, duration: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handles = self.handles.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            callback();
            handles.lock().expect("timer map poisoned").remove(&id);
        });
        self.handles
            .lock()
            .expect("timer map poisoned")
            .insert(id, join.abort_handle());
        TimerHandle(id)
    }

    /// Schedule `callback` to run every `period` starting `initial` from now.
    /// Fires at most once per period, forever, until cancelled.
    pub fn schedule_periodic<F>(&self, initial: Duration, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let join = tokio::spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                callback();
                tokio::time::sleep(period).await;
            }
        });
        self.handles
            .lock()
            .expect("timer map poisoned")
            .insert(id, join.abort_handle());
        TimerHandle(id)
    }

    /// Cancel a previously scheduled timer. Idempotent.
    pub fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = self
            .handles
            .lock()
            .expect("timer map poisoned")
            .remove(&handle.0)
        {
            abort.abort();
        }
    }

    /// Cancel every outstanding timer. Callers that hold critical state
    /// (arbiter buffers, pending orders) must drain it synchronously
    /// themselves before or after calling this — the pool has no notion of
    /// what a "critical" flush is.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().expect("timer map poisoned");
        for (_, abort) in handles.drain() {
            abort.abort();
        }
        trace!("timer service shut down");
    }

    pub fn outstanding_count(&self) -> usize {
        self.handles.lock().expect("timer map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test(start_paused = true)]
    async fn schedule_once_fires_after_duration() {
        let svc = TimerService::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        svc.schedule_once(Duration::from_secs(5), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let svc = TimerService::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = svc.schedule_once(Duration::from_secs(5), move || {
            flag.store(true, Ordering::SeqCst);
        });
        svc.cancel(handle);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let svc = TimerService::new();
        let handle = svc.schedule_once(Duration::from_secs(1), || {});
        svc.cancel(handle);
        svc.cancel(handle); // no panic
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_fires_more_than_once() {
        let svc = TimerService::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        svc.schedule_periodic(Duration::from_secs(1), Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_clock_advances() {
        let start = Utc::now();
        let clock = TestClock::new(start);
        clock.advance(chrono::Duration::seconds(35));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(35));
    }
}
