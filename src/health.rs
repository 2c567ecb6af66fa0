//! Health Monitor (component F).
//!
//! Answers "is the adapter usable right now" without probing on every call:
//! a verdict is cached for `health_cache_ttl` before the next call
//! recomputes it from `adapter.is_active()` plus, when active, a short
//! round-trip probe through the adapter itself.

use crate::adapter::DebuggerAdapter;
use crate::cancel::{CancelReason, CancelToken};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Upper bound on how long a probe command is allowed to run before the
/// monitor gives up and declares the adapter unhealthy. Independent of
/// `command_timeout`, which governs ordinary client-submitted commands.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The text of the harmless command used to confirm the adapter still
/// produces output on request.
const PROBE_COMMAND: &str = ".echo ok";

pub struct HealthMonitor {
    adapter: Arc<DebuggerAdapter>,
    cache_ttl: Duration,
    cached: Mutex<Option<(bool, Instant)>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(adapter: Arc<DebuggerAdapter>, cache_ttl: Duration) -> Self {
        Self {
            adapter,
            cache_ttl,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached verdict if it's younger than `health_cache_ttl`,
    /// otherwise recompute and cache a fresh one.
    pub async fn is_healthy(&self) -> bool {
        {
            let cached = self.cached.lock().await;
            if let Some((verdict, at)) = *cached {
                if at.elapsed() < self.cache_ttl {
                    return verdict;
                }
            }
        }
        let verdict = self.probe().await;
        *self.cached.lock().await = Some((verdict, Instant::now()));
        verdict
    }

    /// Force the cached verdict to unhealthy, e.g. right after an
    /// `AdapterFault` so the next `is_healthy()` caller doesn't serve a
    /// stale "healthy" from before the fault.
    pub async fn mark_unhealthy(&self) {
        *self.cached.lock().await = Some((false, Instant::now()));
    }

    /// Bypass the cache and probe right now, caching the fresh verdict.
    /// Used by recovery, which needs an up-to-date answer regardless of TTL.
    pub async fn probe_fresh(&self) -> bool {
        let verdict = self.probe().await;
        *self.cached.lock().await = Some((verdict, Instant::now()));
        verdict
    }

    async fn probe(&self) -> bool {
        if !self.adapter.is_active() {
            return false;
        }

        let cancel = CancelToken::new();
        let timeout_cancel = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(PROBE_TIMEOUT).await;
            timeout_cancel.cancel(CancelReason::Timeout);
        });

        let result = self.adapter.execute(PROBE_COMMAND, cancel).await;
        timer.abort();
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn inactive_adapter_is_unhealthy() {
        let adapter = Arc::new(DebuggerAdapter::new("cdb.exe", StdDuration::from_secs(1)));
        let monitor = HealthMonitor::new(adapter, StdDuration::from_millis(50));
        assert!(!monitor.is_healthy().await);
    }

    #[tokio::test]
    async fn cached_verdict_is_reused_within_ttl() {
        let adapter = Arc::new(DebuggerAdapter::new("cdb.exe", StdDuration::from_secs(1)));
        let monitor = HealthMonitor::new(adapter, StdDuration::from_secs(60));
        assert!(!monitor.is_healthy().await);
        monitor.mark_unhealthy().await;
        // Still within TTL: repeated calls must not re-probe an adapter
        // that isn't even active (cached value returned directly).
        assert!(!monitor.is_healthy().await);
    }
}
