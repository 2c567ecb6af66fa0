//! Recovery Orchestrator (component G).
//!
//! Multi-step mitigation for an adapter judged stuck or faulted: cancel
//! pending work, soft-break CDB, probe, and if still unhealthy, restart the
//! process outright. Attempts are limited and cooled down so a wedged
//! environment doesn't spin forever.
//!
//! Holds a plain callback rather than a reference to the queue processor:
//! the processor depends on this orchestrator for recovery, so an
//! orchestrator-to-processor reference back would be a construction cycle.

use crate::adapter::DebuggerAdapter;
use crate::config::EngineConfig;
use crate::health::HealthMonitor;
use crate::notify::{NotificationSink, SessionRecoveryEvent};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct RecoveryState {
    attempts: u32,
    last_attempt: Option<DateTime<Utc>>,
}

/// Grace window given to CDB to respond to a soft break before probing.
const BREAK_GRACE: Duration = Duration::from_secs(1);

/// Cancels every still-pending command for a session and returns the ids
/// that were actually cancelled, for `affected_commands` on the resulting
/// `SessionRecovery` event. Boxed as an async callback (rather than a plain
/// `fn`) because cancelling a command is itself an async registry mutation;
/// a direct reference to the queue processor is deliberately avoided here —
/// see the module doc comment.
pub type CancelAllPending = Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = Vec<String>> + Send>> + Send + Sync>;

pub struct RecoveryOrchestrator {
    session_id: String,
    adapter: Arc<DebuggerAdapter>,
    health: Arc<HealthMonitor>,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
    default_symbol_path: String,
    cancel_all_pending: CancelAllPending,
    state: RwLock<RecoveryState>,
}

impl RecoveryOrchestrator {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        adapter: Arc<DebuggerAdapter>,
        health: Arc<HealthMonitor>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
        default_symbol_path: impl Into<String>,
        cancel_all_pending: CancelAllPending,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            adapter,
            health,
            sink,
            config,
            default_symbol_path: default_symbol_path.into(),
            cancel_all_pending,
            state: RwLock::new(RecoveryState {
                attempts: 0,
                last_attempt: None,
            }),
        }
    }

    pub async fn attempts(&self) -> u32 {
        self.state.read().await.attempts
    }

    /// Refused when the attempt budget is exhausted and the cooldown since
    /// the last attempt hasn't elapsed.
    async fn eligible(&self) -> bool {
        let state = self.state.read().await;
        if state.attempts < self.config.recovery_max_attempts {
            return true;
        }
        match state.last_attempt {
            None => true,
            Some(last) => {
                let elapsed = Utc::now() - last;
                elapsed >= chrono::Duration::from_std(self.config.recovery_cooldown()).unwrap_or_default()
            }
        }
    }

    /// Run the full cancel -> break -> probe -> (restart) procedure. Returns
    /// true iff the adapter is healthy (or was restarted successfully) by
    /// the time this returns.
    pub async fn recover(&self, reason: &str) -> bool {
        if !self.eligible().await {
            self.publish("Recovery Refused", false, &[], "attempt budget exhausted within cooldown")
                .await;
            return false;
        }

        self.publish("Recovery Started", false, &[], reason).await;

        let affected = (self.cancel_all_pending)(self.session_id.clone()).await;

        self.adapter.signal_break().await;
        tokio::time::sleep(BREAK_GRACE).await;

        if self.health.probe_fresh().await {
            self.on_success(&affected).await;
            self.publish("Recovery Completed", true, &affected, "adapter responded after soft break")
                .await;
            return true;
        }

        // Soft break didn't recover it: force a restart.
        (self.cancel_all_pending)(self.session_id.clone()).await;

        let attempt_number = { self.state.read().await.attempts + 1 };
        let _ = self.adapter.stop().await;
        tokio::time::sleep(self.config.restart_delay(attempt_number)).await;

        if self.adapter.is_active() {
            self.on_failure().await;
            self.publish("Recovery Failed", false, &affected, "adapter still active after stop")
                .await;
            return false;
        }

        match self.adapter.start("", &self.default_symbol_path).await {
            Ok(()) => {
                self.adapter.note_restart();
                self.on_success(&affected).await;
                self.publish("Recovery Completed", true, &affected, "adapter restarted successfully")
                    .await;
                true
            }
            Err(err) => {
                self.on_failure().await;
                self.publish("Recovery Failed", false, &affected, &err.to_string()).await;
                false
            }
        }
    }

    async fn on_success(&self, _affected: &[String]) {
        let mut state = self.state.write().await;
        state.attempts = 0;
        state.last_attempt = None;
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.attempts = state.attempts.saturating_add(1);
        state.last_attempt = Some(Utc::now());
    }

    async fn publish(&self, step: &str, success: bool, affected: &[String], message: &str) {
        tracing::warn!(
            session = %self.session_id,
            step,
            success,
            affected = affected.len(),
            message,
            "recovery step"
        );
        self.sink
            .session_recovery(SessionRecoveryEvent {
                session_id: self.session_id.clone(),
                reason: step.to_string(),
                step: step.to_string(),
                success,
                message: message.to_string(),
                affected_commands: affected.to_vec(),
                timestamp: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.recovery_max_attempts = 1;
        config.recovery_cooldown_secs = 3600;
        config.restart_base_delay_secs = 0;
        config
    }

    #[tokio::test]
    async fn recovery_fails_cleanly_when_adapter_cannot_start() {
        let adapter = Arc::new(DebuggerAdapter::new("definitely-not-a-real-binary", Duration::from_millis(200)));
        let health = Arc::new(HealthMonitor::new(adapter.clone(), Duration::from_millis(10)));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let orchestrator = RecoveryOrchestrator::new(
            "sess-1",
            adapter,
            health,
            Arc::new(NullSink),
            test_config(),
            "",
            Box::new(move |_id| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Vec::new()
                })
            }),
        );

        let ok = orchestrator.recover("adapter fault").await;
        assert!(!ok);
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(orchestrator.attempts().await, 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_within_cooldown_refuse_further_recovery() {
        let adapter = Arc::new(DebuggerAdapter::new("definitely-not-a-real-binary", Duration::from_millis(200)));
        let health = Arc::new(HealthMonitor::new(adapter.clone(), Duration::from_millis(10)));
        let orchestrator = RecoveryOrchestrator::new(
            "sess-1",
            adapter,
            health,
            Arc::new(NullSink),
            test_config(),
            "",
            Box::new(|_id| Box::pin(async { Vec::new() })),
        );

        assert!(!orchestrator.recover("first").await);
        assert_eq!(orchestrator.attempts().await, 1);
        // Second attempt should be refused outright (no adapter start attempted at all):
        // attempts counter must remain unchanged since `eligible()` short-circuits.
        assert!(!orchestrator.recover("second").await);
        assert_eq!(orchestrator.attempts().await, 1);
    }
}
