//! Session Façade (component I).
//!
//! The only public surface most callers touch: composes the registry,
//! queue processor, and recovery orchestrator into the five operations a
//! transport adapter needs — `submit`, `cancel`, `get_result`,
//! `list_commands`, `close` — plus `diagnostics` for observability.

use crate::adapter::DebuggerAdapter;
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::notify::{NotificationSink, ServerHealthEvent, SessionEvent, SessionEventType};
use crate::queue::QueueProcessor;
use crate::registry::{CommandRegistry, CommandSnapshot, CommandState};
use crate::timeout::TimeoutSupervisor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Window Executing commands are given to finish before `close` force-stops
/// the adapter.
const CLOSE_DRAIN_WINDOW: Duration = Duration::from_secs(10);

/// Snapshot returned by `diagnostics()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDiagnostics {
    pub session_id: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub adapter_active: bool,
    pub adapter_restart_count: u32,
    pub degraded: bool,
    pub queue_size: usize,
    pub submitted: usize,
    pub active_commands: usize,
    pub terminal_commands: usize,
    pub recovery_attempts: u32,
    /// Most recent line the adapter's child process wrote to stderr, if any.
    pub last_error: Option<String>,
}

/// A snapshot of a command's status, the shape `get_result` returns.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutcome {
    Pending,
    Terminal(CommandSnapshot),
}

pub struct Session {
    id: String,
    config: EngineConfig,
    registry: CommandRegistry,
    adapter: Arc<DebuggerAdapter>,
    queue: Arc<QueueProcessor>,
    sink: Arc<dyn NotificationSink>,
    shutdown: crate::cancel::CancelToken,
    opened_at: DateTime<Utc>,
    closed_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    closing: AtomicBool,
}

impl Session {
    /// Start a CDB process for `target` and bring the session's queue
    /// processor online. Fails with `StartupFailed` if the adapter's first
    /// prompt isn't observed within `startup_timeout`.
    pub async fn open(config: EngineConfig, sink: Arc<dyn NotificationSink>, target: &str) -> CoreResult<Self> {
        let id = ids::new_session_id();
        let registry = CommandRegistry::new();
        let adapter = Arc::new(DebuggerAdapter::new(config.cdb_path.clone(), config.startup_timeout()));
        adapter.start(target, &config.default_symbol_path).await?;

        let timeouts = Arc::new(TimeoutSupervisor::new());
        let queue = QueueProcessor::new(
            id.clone(),
            registry.clone(),
            adapter.clone(),
            timeouts,
            sink.clone(),
            config.clone(),
            config.default_symbol_path.clone(),
        );

        let shutdown = crate::cancel::CancelToken::new();
        tokio::spawn(queue.clone().run(shutdown.clone()));
        tokio::spawn(retirement_sweep(registry.clone(), config.clone(), shutdown.clone()));
        tokio::spawn(health_publisher(
            id.clone(),
            adapter.clone(),
            queue.clone(),
            registry.clone(),
            sink.clone(),
            config.clone(),
            shutdown.clone(),
        ));

        tracing::info!(session = %id, target, "session opened");
        sink.session_event(SessionEvent {
            session_id: id.clone(),
            event_type: SessionEventType::Created,
            message: "session opened".to_string(),
            context: Some(target.to_string()),
            timestamp: Utc::now(),
        })
        .await;

        Ok(Self {
            id,
            config,
            registry,
            adapter,
            queue,
            sink,
            shutdown,
            opened_at: Utc::now(),
            closed_at: std::sync::Mutex::new(None),
            closing: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Enqueue a command, returning its opaque id immediately.
    pub async fn submit(&self, text: &str) -> CoreResult<String> {
        if self.is_closed() {
            return Err(CoreError::Closed);
        }
        if self.queue.is_degraded() {
            let attempts = self.queue.recovery().attempts().await;
            if attempts >= self.config.recovery_max_attempts {
                return Err(CoreError::RecoveryExhausted { attempts });
            }
            return Err(CoreError::Degraded {
                reason: "adapter recovery in progress or failed; every execution short-circuits until restart"
                    .to_string(),
            });
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::InvalidInput("command text must not be empty".to_string()));
        }

        let id = ids::new_command_id();
        self.registry.insert(id.clone(), text.to_string()).await;
        self.queue.submit(id.clone(), text.to_string()).await;
        Ok(id)
    }

    /// Signal cancellation. A `Queued` command transitions immediately; an
    /// `Executing` one transitions once the adapter acknowledges the break
    /// (handled by the queue processor).
    pub async fn cancel(&self, id: &str, reason: &str) -> CoreResult<bool> {
        let Some(snapshot) = self.registry.get(id).await else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        if snapshot.state.is_terminal() {
            return Ok(false);
        }

        let Some((cancel_token, _)) = self.registry.waiter(id).await else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        cancel_token.cancel(crate::cancel::CancelReason::User);

        if snapshot.state == CommandState::Queued {
            match self.registry.cancel(id, reason).await {
                Ok(()) | Err(CoreError::AlreadyTerminal) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Snapshot a command's current status. If `wait` is non-zero and the
    /// command isn't terminal yet, waits up to `wait` for it to become so
    /// before returning whatever snapshot is current.
    pub async fn get_result(&self, id: &str, wait: Duration) -> CoreResult<CommandOutcome> {
        let Some(snapshot) = self.registry.get(id).await else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        if snapshot.state.is_terminal() {
            self.registry.mark_read(id, self.config.retention_observations).await;
            return Ok(CommandOutcome::Terminal(snapshot));
        }
        if wait.is_zero() {
            return Ok(CommandOutcome::Pending);
        }

        if let Some((_, done)) = self.registry.waiter(id).await {
            let _ = tokio::time::timeout(wait, done.notified()).await;
        }

        let Some(snapshot) = self.registry.get(id).await else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        if snapshot.state.is_terminal() {
            self.registry.mark_read(id, self.config.retention_observations).await;
            Ok(CommandOutcome::Terminal(snapshot))
        } else {
            Ok(CommandOutcome::Pending)
        }
    }

    pub async fn list_commands(&self) -> Vec<CommandSnapshot> {
        self.registry.list().await
    }

    /// Idempotent shutdown: cancel pending work, drain Executing commands,
    /// stop the adapter, and mark the session closed.
    pub async fn close(&self, reason: &str) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(session = %self.id, reason, "session closing");
        self.shutdown.cancel(crate::cancel::CancelReason::User);
        self.queue.shutdown(CLOSE_DRAIN_WINDOW).await;
        *self.closed_at.lock().expect("closed_at mutex poisoned") = Some(Utc::now());

        self.sink
            .session_event(SessionEvent {
                session_id: self.id.clone(),
                event_type: SessionEventType::Closed,
                message: reason.to_string(),
                context: None,
                timestamp: Utc::now(),
            })
            .await;
    }

    pub async fn diagnostics(&self) -> SessionDiagnostics {
        let counters = self.registry.counters().await;
        SessionDiagnostics {
            session_id: self.id.clone(),
            opened_at: self.opened_at,
            closed_at: *self.closed_at.lock().expect("closed_at mutex poisoned"),
            adapter_active: self.adapter.is_active(),
            adapter_restart_count: self.adapter.restart_count(),
            degraded: self.queue.is_degraded(),
            queue_size: self.queue.pending_len().await,
            submitted: counters.submitted,
            active_commands: counters.active,
            terminal_commands: counters.terminal,
            recovery_attempts: self.queue.recovery().attempts().await,
            last_error: self.adapter.stderr_snapshot().await.last().cloned(),
        }
    }
}

/// Background sweep retiring terminal command records past their retention
/// window, run once per session at `health_check_interval` cadence (no
/// dedicated knob is named for this in the data model, so it piggybacks on
/// the existing health-check period rather than adding a new one).
async fn retirement_sweep(registry: CommandRegistry, config: EngineConfig, shutdown: crate::cancel::CancelToken) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(config.health_check_interval()) => {}
        }
        registry
            .retire_expired(config.retention_observations, config.command_timeout())
            .await;
    }
}

/// Background task publishing a `ServerHealth` event at `health_check_interval`.
async fn health_publisher(
    session_id: String,
    adapter: Arc<DebuggerAdapter>,
    queue: Arc<QueueProcessor>,
    registry: CommandRegistry,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
    shutdown: crate::cancel::CancelToken,
) {
    let started_at = tokio::time::Instant::now();
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(config.health_check_interval()) => {}
        }

        let healthy = queue.health().is_healthy().await;
        let counters = registry.counters().await;
        sink.server_health(ServerHealthEvent {
            session_id: session_id.clone(),
            status: if healthy { "healthy".to_string() } else { "unhealthy".to_string() },
            adapter_active: adapter.is_active(),
            queue_size: queue.pending_len().await,
            active_commands: counters.active,
            uptime_seconds: started_at.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.startup_timeout_secs = 1;
        config
    }

    #[tokio::test]
    async fn open_against_missing_binary_fails_with_startup_error() {
        let mut config = test_config();
        config.cdb_path = "definitely-not-a-real-binary".to_string();
        let result = Session::open(config, Arc::new(NullSink), "").await;
        assert!(matches!(result, Err(CoreError::StartupFailed { .. })));
    }
}
