//! One reconnect timer per server.
//!
//! Scheduling for a server that already has a timer replaces it: the old
//! timer is cancelled and will never run its task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use tb_domain::trace::TraceEvent;

use crate::backoff::ReconnectBackoff;

struct Timer {
    seq: u64,
    attempt: u32,
    cancel: CancellationToken,
}

pub struct ReconnectScheduler {
    backoff: ReconnectBackoff,
    timers: Arc<Mutex<HashMap<String, Timer>>>,
    next_seq: AtomicU64,
}

impl ReconnectScheduler {
    pub fn new(backoff: ReconnectBackoff) -> Self {
        Self {
            backoff,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn backoff(&self) -> &ReconnectBackoff {
        &self.backoff
    }

    /// Run `task` after the back-off delay for `attempt`.
    ///
    /// Returns the delay, or `None` when the attempt budget is exhausted (in
    /// which case nothing is scheduled and any existing timer is cancelled).
    pub fn schedule<F>(&self, server_id: &str, attempt: u32, task: F) -> Option<Duration>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.backoff.should_give_up(attempt) {
            self.cancel(server_id);
            return None;
        }

        let delay = self.backoff.delay_for_attempt(server_id, attempt);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let previous = self.timers.lock().insert(
            server_id.to_owned(),
            Timer {
                seq,
                attempt,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        TraceEvent::ReconnectScheduled {
            server_id: server_id.to_owned(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        }
        .emit();

        let timers = Arc::clone(&self.timers);
        let id = server_id.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            {
                let mut timers = timers.lock();
                match timers.get(&id) {
                    Some(timer) if timer.seq == seq => {
                        timers.remove(&id);
                    }
                    _ => return,
                }
            }
            task.await;
        });

        Some(delay)
    }

    /// Cancel the pending timer for a server. Returns whether one existed.
    pub fn cancel(&self, server_id: &str) -> bool {
        match self.timers.lock().remove(server_id) {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, server_id: &str) -> bool {
        self.timers.lock().contains_key(server_id)
    }

    /// Attempt number of the pending timer, if any.
    pub fn scheduled_attempt(&self, server_id: &str) -> Option<u32> {
        self.timers.lock().get(server_id).map(|t| t.attempt)
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Timer> = self.timers.lock().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.cancel.cancel();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fixed(ms: u64, max_attempts: u32) -> ReconnectScheduler {
        ReconnectScheduler::new(ReconnectBackoff {
            initial_delay: Duration::from_millis(ms),
            max_delay: Duration::from_millis(ms),
            backoff_factor: 1.0,
            max_attempts,
        })
    }

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay_and_clears_itself() {
        let scheduler = fixed(100, 0);
        let fired = Arc::new(AtomicUsize::new(0));

        let delay = scheduler.schedule("s", 0, counter_task(&fired)).unwrap();
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(125));
        assert!(scheduler.is_scheduled("s"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_previous_timer() {
        let scheduler = fixed(100, 0);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.schedule("s", 0, counter_task(&first));
        scheduler.schedule("s", 1, counter_task(&second));
        assert_eq!(scheduler.scheduled_attempt("s"), Some(1));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let scheduler = fixed(100, 0);
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule("a", 0, counter_task(&fired));
        scheduler.schedule("b", 0, counter_task(&fired));

        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));
        assert_eq!(scheduler.cancel_all(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_budget_schedules_nothing() {
        let scheduler = fixed(100, 2);
        let fired = Arc::new(AtomicUsize::new(0));
        assert!(scheduler.schedule("s", 1, counter_task(&fired)).is_some());
        assert!(scheduler.schedule("s", 2, counter_task(&fired)).is_none());
        assert!(!scheduler.is_scheduled("s"));
    }
}
