//! Timeout Supervisor (component E).
//!
//! Per-command one-shot expiry timers. `start` on an id that already has a
//! timer supersedes it — the superseded task observes a generation bump and
//! skips its handler. `extend` replaces the active timer with a new one
//! whose additional time is `extra`, added on top of the current deadline.
//! `cancel` stops the timer without ever invoking the handler. All
//! operations are idempotent on unknown ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

type ExpireHandler = Arc<dyn Fn() + Send + Sync>;

struct TimerEntry {
    generation: Arc<AtomicU64>,
    deadline: Instant,
    handler: ExpireHandler,
}

/// Tracks one live timer per command id, across an arbitrary number of
/// commands sharing the supervisor (one instance per session).
pub struct TimeoutSupervisor {
    timers: Mutex<HashMap<String, TimerEntry>>,
}

impl TimeoutSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a one-shot expiry. `on_expire` fires from a detached task
    /// after `duration`, unless superseded, extended away, or cancelled
    /// first. In practice `on_expire` signals the command's cancellation
    /// token with `CancelReason::Timeout`.
    pub async fn start<F>(&self, id: impl Into<String>, duration: Duration, on_expire: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let deadline = Instant::now() + duration;
        self.schedule(id.into(), deadline, Arc::new(on_expire)).await;
    }

    /// Push the active timer's deadline back by `extra`, reusing its
    /// handler. A no-op if `id` has no active timer.
    pub async fn extend(&self, id: &str, extra: Duration) {
        let existing = {
            let timers = self.timers.lock().await;
            timers.get(id).map(|entry| (entry.deadline + extra, entry.handler.clone()))
        };
        if let Some((deadline, handler)) = existing {
            self.schedule(id.to_string(), deadline, handler).await;
        }
    }

    /// Stop the active timer; its handler, if still pending, will not run.
    pub async fn cancel(&self, id: &str) {
        let mut timers = self.timers.lock().await;
        if let Some(entry) = timers.remove(id) {
            entry.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn schedule(&self, id: String, deadline: Instant, handler: ExpireHandler) {
        let generation = Arc::new(AtomicU64::new(0));
        {
            let mut timers = self.timers.lock().await;
            if let Some(prev) = timers.get(&id) {
                prev.generation.fetch_add(1, Ordering::SeqCst);
            }
            timers.insert(
                id,
                TimerEntry {
                    generation: generation.clone(),
                    deadline,
                    handler: handler.clone(),
                },
            );
        }

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if generation.load(Ordering::SeqCst) == 0 {
                handler();
            }
        });
    }
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn expired_timer_invokes_handler() {
        let supervisor = TimeoutSupervisor::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        supervisor
            .start("c1", StdDuration::from_millis(20), move || flag.store(true, Ordering::SeqCst))
            .await;

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let supervisor = TimeoutSupervisor::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        supervisor
            .start("c1", StdDuration::from_millis(20), move || flag.store(true, Ordering::SeqCst))
            .await;
        supervisor.cancel("c1").await;

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn superseding_start_drops_the_prior_handler() {
        let supervisor = TimeoutSupervisor::new();
        let first_fired = Arc::new(AtomicBool::new(false));
        let second_fired = Arc::new(AtomicBool::new(false));

        let first_flag = first_fired.clone();
        supervisor
            .start("c1", StdDuration::from_millis(200), move || first_flag.store(true, Ordering::SeqCst))
            .await;

        let second_flag = second_fired.clone();
        supervisor
            .start("c1", StdDuration::from_millis(20), move || second_flag.store(true, Ordering::SeqCst))
            .await;

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(second_fired.load(Ordering::SeqCst));
        assert!(!first_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn extend_pushes_the_deadline_back() {
        let supervisor = TimeoutSupervisor::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        supervisor
            .start("c1", StdDuration::from_millis(30), move || flag.store(true, Ordering::SeqCst))
            .await;
        supervisor.extend("c1", StdDuration::from_millis(150)).await;

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst), "extend should have pushed the deadline past 60ms");

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert!(fired.load(Ordering::SeqCst), "handler should fire once the extended deadline passes");
    }

    #[tokio::test]
    async fn extend_on_unknown_id_is_a_no_op() {
        let supervisor = TimeoutSupervisor::new();
        supervisor.extend("missing", StdDuration::from_millis(10)).await;
    }
}
