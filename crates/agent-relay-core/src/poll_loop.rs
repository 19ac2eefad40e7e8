//! Recurring poll scheduler with explicit cancellation.

use std::{fmt::Display, future::Future, ops::ControlFlow, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};

/// Cadence used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Handle to a running poll loop.
///
/// The operation is invoked immediately, then on every multiple of the
/// interval. At most one invocation is in flight: ticks that elapse while an
/// invocation is pending are skipped, not queued, and the next invocation
/// waits for the following tick. A failed invocation is logged and the loop keeps
/// going; it ends when the operation returns `ControlFlow::Break` or when the
/// handle is cancelled or dropped.
pub struct PollLoop {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollLoop {
    /// Start polling `operation` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut, E>(interval: Duration, mut operation: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ControlFlow<()>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut deadline = start;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    () = time::sleep_until(deadline) => {}
                }
                if *cancel_rx.borrow() {
                    break;
                }

                let outcome = tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    outcome = operation() => outcome,
                };

                match outcome {
                    Ok(ControlFlow::Break(())) => break,
                    Ok(ControlFlow::Continue(())) => {}
                    Err(e) => tracing::debug!("Poll operation failed, retrying next tick: {e}"),
                }
                deadline = next_tick(start, deadline, Instant::now(), period);
            }
        });

        Self { cancel_tx, handle }
    }

    /// Stop the loop.
    ///
    /// Once this returns no new invocation starts, and an invocation that is
    /// still awaiting is dropped at its next suspension point.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
        self.handle.abort();
    }

    /// Whether the loop is neither cancelled nor finished.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !*self.cancel_tx.borrow() && !self.handle.is_finished()
    }
}

/// First cadence tick after `last` that has not already passed at `now`.
fn next_tick(start: Instant, last: Instant, now: Instant, period: Duration) -> Instant {
    let following = last + period;
    if now <= following {
        return following;
    }
    let ticks = (now - start).as_nanos().div_ceil(period.as_nanos());
    start + period.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnMut() -> futures::future::Ready<Result<ControlFlow<()>, String>> + Send + 'static
    {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(ControlFlow::Continue(())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invokes_immediately_then_on_cadence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poll = PollLoop::spawn(DEFAULT_POLL_INTERVAL, counting(&calls));

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(poll.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_invocations_skip_ticks() {
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let (s, f, m) = (Arc::clone(&starts), Arc::clone(&in_flight), Arc::clone(&max_in_flight));
        let _poll = PollLoop::spawn(Duration::from_millis(1000), move || {
            let (s, f, m) = (Arc::clone(&s), Arc::clone(&f), Arc::clone(&m));
            async move {
                s.lock().unwrap().push(origin.elapsed().as_millis());
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_millis(2500)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(ControlFlow::Continue(()))
            }
        });

        time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(*starts.lock().unwrap(), vec![0, 3000, 6000, 9000]);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_next_tick_lands_on_cadence() {
        let start = Instant::now();
        let period = Duration::from_millis(1000);
        let at = |ms| start + Duration::from_millis(ms);

        assert_eq!(next_tick(start, at(1000), at(1000), period), at(2000));
        assert_eq!(next_tick(start, at(0), at(2500), period), at(3000));
        assert_eq!(next_tick(start, at(0), at(3000), period), at(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_invocations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poll = PollLoop::spawn(DEFAULT_POLL_INTERVAL, counting(&calls));

        time::sleep(Duration::from_millis(1500)).await;
        poll.cancel();
        assert!(!poll.is_running());
        let seen = calls.load(Ordering::SeqCst);

        time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_invocation() {
        let completed = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&completed);
        let poll = PollLoop::spawn(DEFAULT_POLL_INTERVAL, move || {
            let done = Arc::clone(&done);
            async move {
                time::sleep(Duration::from_millis(5000)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(ControlFlow::Continue(()))
            }
        });

        time::sleep(Duration::from_millis(1000)).await;
        poll.cancel();
        time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let poll = PollLoop::spawn(DEFAULT_POLL_INTERVAL, move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(Ok::<_, String>(if n == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }))
        });

        time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!poll.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _poll = PollLoop::spawn(DEFAULT_POLL_INTERVAL, move || {
            c.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err::<ControlFlow<()>, _>("connection refused"))
        });

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poll = PollLoop::spawn(DEFAULT_POLL_INTERVAL, counting(&calls));
        time::sleep(Duration::from_millis(10)).await;
        drop(poll);

        time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
