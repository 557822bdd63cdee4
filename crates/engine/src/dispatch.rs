//! Backpressure-bounded dispatch of asynchronous units of work.
//!
//! Every mutating pipeline operation runs through here. When the in-flight
//! count has reached the configured bound, new work is dropped silently:
//! the engine trades completeness for stability under overload. The counter
//! is atomic because work runs on a multi-threaded tokio runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Decrements the in-flight counter when the unit of work finishes,
/// including on panic.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Schedules units of work bounded by an in-flight limit.
pub struct Dispatcher {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
    fire_and_forget: bool,
}

impl Dispatcher {
    pub fn new(max_in_flight: usize, fire_and_forget: bool) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight,
            fire_and_forget,
        }
    }

    /// Currently executing units of work.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run a unit of work under the in-flight bound.
    ///
    /// Returns `false` when the bound is reached and the work was dropped.
    /// In fire-and-forget mode the work is spawned and this returns
    /// immediately; otherwise the work is awaited to completion. The task
    /// itself must not error out — pipeline units report failures through
    /// the error hook, never by propagating.
    pub async fn dispatch<F>(&self, task: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Claim a slot atomically so concurrent callers can never overshoot.
        let claimed = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            });
        if claimed.is_err() {
            tracing::debug!(
                max_in_flight = self.max_in_flight,
                "in-flight limit reached, dropping unit of work"
            );
            return false;
        }

        let guard = InFlightGuard(self.in_flight.clone());
        let guarded = async move {
            let _guard = guard;
            task.await;
        };

        if self.fire_and_forget {
            tokio::spawn(guarded);
        } else {
            guarded.await;
        }
        true
    }

    /// Poll the in-flight counter until it drains or the timeout elapses.
    ///
    /// Returns `true` if all outstanding work completed. Timing out
    /// abandons the work, it does not cancel it.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;

    #[tokio::test]
    async fn awaited_mode_runs_inline() {
        let dispatcher = Dispatcher::new(10, false);
        let ran = Arc::new(Counter::new(0));
        let r = ran.clone();
        let accepted = dispatcher
            .dispatch(async move {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(accepted);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn excess_work_is_dropped() {
        let dispatcher = Arc::new(Dispatcher::new(2, true));
        let gate = Arc::new(tokio::sync::Notify::new());

        for _ in 0..2 {
            let g = gate.clone();
            assert!(dispatcher.dispatch(async move { g.notified().await }).await);
        }
        // Let the spawned tasks reach the gate.
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.in_flight(), 2);

        // Third unit is refused outright.
        assert!(!dispatcher.dispatch(async {}).await);
        assert_eq!(dispatcher.in_flight(), 2);

        gate.notify_waiters();
        assert!(dispatcher.flush(Duration::from_secs(1)).await);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_never_exceeds_bound() {
        let dispatcher = Arc::new(Dispatcher::new(8, true));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        let mut submitters = Vec::new();
        for _ in 0..64 {
            let dispatcher = dispatcher.clone();
            let gate = gate.clone();
            submitters.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(async move {
                        let _permit = gate.acquire().await;
                    })
                    .await
            }));
        }

        let mut accepted = 0;
        for handle in submitters {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        // All units block on the gate, so exactly the bound is claimed.
        assert_eq!(accepted, 8);
        assert_eq!(dispatcher.in_flight(), 8);

        gate.add_permits(64);
        assert!(dispatcher.flush(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn flush_times_out_on_stuck_work() {
        let dispatcher = Dispatcher::new(1, true);
        let gate = Arc::new(tokio::sync::Notify::new());
        let g = gate.clone();
        dispatcher.dispatch(async move { g.notified().await }).await;

        assert!(!dispatcher.flush(Duration::from_millis(80)).await);
        gate.notify_waiters();
        assert!(dispatcher.flush(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn counter_recovers_after_task_panic() {
        let dispatcher = Dispatcher::new(1, true);
        dispatcher.dispatch(async { panic!("worker died") }).await;
        assert!(dispatcher.flush(Duration::from_secs(1)).await);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
