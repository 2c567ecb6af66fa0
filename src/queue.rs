//! Queue Processor (component D).
//!
//! One dedicated cooperative task per session, the sole caller of the
//! adapter's `execute`. Dequeues commands, asks the batch planner to form a
//! plan, submits it, splits and records the result, and escalates to
//! recovery on adapter faults. See the session façade for how this task is
//! spawned and torn down.

use crate::adapter::{DebuggerAdapter, ExecuteError};
use crate::batch::{self, BatchOutcome, PlannedCommand};
use crate::cancel::{self, CancelReason};
use crate::config::EngineConfig;
use crate::heartbeat;
use crate::notify::{CommandHeartbeatEvent, CommandNotificationStatus, CommandStatusEvent, NotificationSink};
use crate::recovery::RecoveryOrchestrator;
use crate::registry::CommandRegistry;
use crate::timeout::TimeoutSupervisor;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Shared state backing one session's queue, safe to clone into the
/// recovery orchestrator's cancel-all-pending callback without a reference
/// back to the processor itself.
struct Shared {
    registry: CommandRegistry,
    pending: Mutex<VecDeque<(String, String)>>,
    wake: Notify,
}

impl Shared {
    async fn push(&self, id: String, text: String) {
        self.pending.lock().await.push_back((id, text));
        self.wake.notify_one();
    }

    async fn snapshot(&self) -> Vec<(String, String)> {
        self.pending.lock().await.iter().cloned().collect()
    }

    /// Remove the given ids from the pending deque; they have either been
    /// planned for execution or found stale (already cancelled).
    async fn remove(&self, ids: &[String]) {
        let mut pending = self.pending.lock().await;
        pending.retain(|(id, _)| !ids.contains(id));
    }

    /// Cancel every still-Queued id, used as recovery's cancel-all-pending
    /// callback. Per the concurrency model, a cancel mid-restart leaves the
    /// record `Cancelled`, not `Failed`. Returns the ids actually cancelled.
    async fn cancel_all_pending(&self) -> Vec<String> {
        let ids: Vec<String> = self.pending.lock().await.iter().map(|(id, _)| id.clone()).collect();
        let mut cancelled = Vec::with_capacity(ids.len());
        for id in &ids {
            if self.registry.cancel(id, "recovery in progress").await.is_ok() {
                cancelled.push(id.clone());
            }
        }
        self.remove(&ids).await;
        cancelled
    }
}

pub struct QueueProcessor {
    session_id: String,
    shared: Arc<Shared>,
    adapter: Arc<DebuggerAdapter>,
    timeouts: Arc<TimeoutSupervisor>,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
    health: Arc<crate::health::HealthMonitor>,
    recovery: Arc<RecoveryOrchestrator>,
    degraded: AtomicBool,
}

impl QueueProcessor {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        registry: CommandRegistry,
        adapter: Arc<DebuggerAdapter>,
        timeouts: Arc<TimeoutSupervisor>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
        default_symbol_path: impl Into<String>,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let shared = Arc::new(Shared {
            registry: registry.clone(),
            pending: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
        });

        let shared_for_cb = shared.clone();
        let cancel_all_pending: crate::recovery::CancelAllPending = Box::new(move |_session_id| {
            let shared = shared_for_cb.clone();
            Box::pin(async move { shared.cancel_all_pending().await })
        });

        let health = Arc::new(crate::health::HealthMonitor::new(adapter.clone(), config.health_cache_ttl()));
        let recovery = Arc::new(RecoveryOrchestrator::new(
            session_id.clone(),
            adapter.clone(),
            health.clone(),
            sink.clone(),
            config.clone(),
            default_symbol_path,
            cancel_all_pending,
        ));

        Arc::new(Self {
            session_id,
            shared,
            adapter,
            timeouts,
            sink,
            config,
            health,
            recovery,
            degraded: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn recovery(&self) -> Arc<RecoveryOrchestrator> {
        self.recovery.clone()
    }

    #[must_use]
    pub fn health(&self) -> Arc<crate::health::HealthMonitor> {
        self.health.clone()
    }

    pub async fn submit(&self, id: String, text: String) {
        self.shared.push(id, text).await;
    }

    pub async fn pending_len(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Cancel every still-Queued command, wait up to `drain_window` for any
    /// currently Executing command to finish, then stop the adapter.
    /// Idempotent: safe to call on an already-stopped adapter.
    pub async fn shutdown(&self, drain_window: std::time::Duration) {
        self.shared.cancel_all_pending().await;

        let deadline = tokio::time::Instant::now() + drain_window;
        while tokio::time::Instant::now() < deadline {
            if self.shared.registry.counters().await.active == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let _ = self.adapter.stop().await;
    }

    /// Drive the queue until `shutdown` fires. Spawned once per session by
    /// the façade; exits (without panicking) when told to stop.
    pub async fn run(self: Arc<Self>, shutdown: crate::cancel::CancelToken) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                () = self.run_one_cycle() => {}
            }
        }
    }

    async fn run_one_cycle(self: &Arc<Self>) {
        let mut snapshot = self.shared.snapshot().await;
        if snapshot.is_empty() {
            self.shared.wake.notified().await;
            return;
        }

        let mut planned = batch::plan(&self.config, &snapshot);
        if planned.len() == 1 && batch::is_batchable(&self.config, &planned[0].text) {
            let _ = tokio::time::timeout(self.config.batch_wait(), self.shared.wake.notified()).await;
            snapshot = self.shared.snapshot().await;
            planned = batch::plan(&self.config, &snapshot);
        }

        let planned_ids: Vec<String> = planned.iter().map(|p| p.id.clone()).collect();
        self.shared.remove(&planned_ids).await;

        let mut live = Vec::with_capacity(planned.len());
        for p in planned {
            if let Some(snapshot) = self.shared.registry.get(&p.id).await {
                if snapshot.state == crate::registry::CommandState::Queued {
                    live.push(p);
                }
            }
        }
        if live.is_empty() {
            return;
        }

        if self.is_degraded() {
            self.fail_all(&live, "Adapter degraded").await;
            return;
        }

        self.execute_plan(live).await;
    }

    async fn execute_plan(self: &Arc<Self>, live: Vec<PlannedCommand>) {
        let now = Utc::now();
        let mut tokens = Vec::with_capacity(live.len());
        for p in &live {
            let _ = self.shared.registry.set_executing(&p.id, now).await;
            self.publish(&p.id, &p.text, CommandNotificationStatus::Executing, None, None).await;

            if let Some((cancel_token, _)) = self.shared.registry.waiter(&p.id).await {
                let timer_token = cancel_token.clone();
                self.timeouts
                    .start(p.id.clone(), self.config.command_timeout(), move || {
                        timer_token.cancel(CancelReason::Timeout);
                    })
                    .await;
                tokens.push((p.id.clone(), cancel_token));
            }
        }

        let input = batch::compose(&live);
        let combined = cancel::combine_all(tokens.iter().map(|(_, t)| t.clone()).collect());

        let ceiling = self.config.batch_timeout(live.len());
        let ceiling_signal = combined.clone();
        let ceiling_task = tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            ceiling_signal.cancel(CancelReason::Timeout);
        });

        let heartbeat_task = self.spawn_heartbeat_task(&live);

        let result = self.adapter.execute(&input, combined).await;
        ceiling_task.abort();
        heartbeat_task.abort();

        for (id, _) in &tokens {
            self.timeouts.cancel(id).await;
        }

        match result {
            Ok(output) => self.record_success(&live, &output).await,
            Err(ExecuteError::Cancelled(_)) => self.record_partial_cancel(&live, &tokens).await,
            Err(ExecuteError::Unresponsive) | Err(ExecuteError::Fault(_)) => {
                tracing::error!(session = %self.session_id, commands = live.len(), "batch failed, triggering recovery");
                self.fail_all(&live, "Session restart").await;
                self.health.mark_unhealthy().await;
                let ok = self.recovery.recover("adapter fault").await;
                self.degraded.store(!ok, Ordering::SeqCst);
            }
        }
    }

    /// Periodically publish a heartbeat for every command in a batch still
    /// running once it has been Executing longer than the configured
    /// threshold. The caller aborts the returned handle when the batch's
    /// adapter round-trip completes.
    fn spawn_heartbeat_task(self: &Arc<Self>, live: &[PlannedCommand]) -> tokio::task::JoinHandle<()> {
        let session_id = self.session_id.clone();
        let sink = self.sink.clone();
        let threshold = self.config.heartbeat_threshold();
        let interval = self.config.heartbeat_interval();
        let started_at = tokio::time::Instant::now();
        let commands: Vec<(String, String)> = live.iter().map(|p| (p.id.clone(), p.text.clone())).collect();

        tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            loop {
                let elapsed = started_at.elapsed();
                for (id, text) in &commands {
                    sink.command_heartbeat(CommandHeartbeatEvent {
                        session_id: session_id.clone(),
                        command_id: id.clone(),
                        command: text.clone(),
                        elapsed_seconds: elapsed.as_secs_f64(),
                        elapsed_display: heartbeat::elapsed_display(elapsed),
                        details: Some(heartbeat::heartbeat_message(text, elapsed)),
                        timestamp: Utc::now(),
                    })
                    .await;
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// `batch::parse` always inserts an outcome for every id it's given
    /// (a missing start marker becomes `Failed("Start marker not found")`),
    /// so there is no "no output" case to attribute separately here.
    async fn record_success(&self, live: &[PlannedCommand], output: &str) {
        let outcomes = batch::parse(live, output);
        for p in live {
            match outcomes.get(&p.id) {
                Some(BatchOutcome::Output(text)) => {
                    let _ = self.shared.registry.complete(&p.id, text.clone()).await;
                    self.publish(&p.id, &p.text, CommandNotificationStatus::Completed, Some(text.clone()), None)
                        .await;
                }
                Some(BatchOutcome::Failed(reason)) => {
                    let _ = self.shared.registry.fail(&p.id, reason.clone()).await;
                    self.publish(&p.id, &p.text, CommandNotificationStatus::Failed, None, Some(reason.clone()))
                        .await;
                }
                None => unreachable!("batch::parse always produces an outcome for every planned id"),
            }
        }
    }

    /// Some, all, or none of `live`'s own cancellation tokens may have
    /// fired by the time the combined signal did. Attribute precisely:
    /// own-token-cancelled ids get their real terminal state; the rest get
    /// `Failed{"Cancelled mid-batch"}` per spec.
    async fn record_partial_cancel(&self, live: &[PlannedCommand], tokens: &[(String, crate::cancel::CancelToken)]) {
        for (p, (_, token)) in live.iter().zip(tokens.iter()) {
            match token.reason() {
                Some(CancelReason::Timeout) => {
                    let _ = self.shared.registry.time_out(&p.id).await;
                    self.publish(&p.id, &p.text, CommandNotificationStatus::Failed, None, Some("timeout".to_string()))
                        .await;
                }
                Some(CancelReason::User) => {
                    let _ = self.shared.registry.cancel(&p.id, "user").await;
                    self.publish(&p.id, &p.text, CommandNotificationStatus::Cancelled, None, None).await;
                }
                Some(CancelReason::Batch | CancelReason::Restart) | None => {
                    let _ = self.shared.registry.fail(&p.id, "Cancelled mid-batch").await;
                    self.publish(
                        &p.id,
                        &p.text,
                        CommandNotificationStatus::Failed,
                        None,
                        Some("Cancelled mid-batch".to_string()),
                    )
                    .await;
                }
            }
        }
    }

    async fn fail_all(&self, live: &[PlannedCommand], reason: &str) {
        for p in live {
            let _ = self.shared.registry.fail(&p.id, reason).await;
            self.publish(&p.id, &p.text, CommandNotificationStatus::Failed, None, Some(reason.to_string()))
                .await;
        }
    }

    async fn publish(
        &self,
        command_id: &str,
        command: &str,
        status: CommandNotificationStatus,
        result: Option<String>,
        error: Option<String>,
    ) {
        let mut event = CommandStatusEvent::new(self.session_id.clone(), command_id, command, status);
        if let Some(result) = result {
            event = event.with_result(result);
        }
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.sink.command_status(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.batch_wait_secs = 0;
        config
    }

    #[tokio::test]
    async fn submit_then_shutdown_without_adapter_marks_nothing_executing() {
        let registry = CommandRegistry::new();
        let adapter = Arc::new(DebuggerAdapter::new("definitely-not-a-real-binary", Duration::from_millis(50)));
        let timeouts = Arc::new(TimeoutSupervisor::new());
        let processor = QueueProcessor::new(
            "sess-1",
            registry.clone(),
            adapter,
            timeouts,
            Arc::new(NullSink),
            test_config(),
            "",
        );

        registry.insert("c1".to_string(), "lm".to_string()).await;
        processor.submit("c1".to_string(), "lm".to_string()).await;
        let cancel = crate::cancel::CancelToken::new();
        cancel.cancel(CancelReason::User);
        processor.run(cancel).await;

        // Adapter was never started: execute_plan would fail fast with
        // AdapterFault, but we shut down before the loop ever dequeues.
        let snapshot = registry.get("c1").await.unwrap();
        assert_eq!(snapshot.state, crate::registry::CommandState::Queued);
    }
}
