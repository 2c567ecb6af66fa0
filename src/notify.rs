//! Outbound notification sink (component H).
//!
//! `NotificationSink` is the only channel the core uses to tell the outside
//! world anything happened. Every method is fire-and-forget from the core's
//! perspective: the trait methods take `&self` and do not return a
//! `Result` — an implementation that fails to deliver must log the failure
//! itself and must never block or propagate an error into the queue
//! processor, timeout supervisor, or recovery orchestrator that called it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Lifecycle status of a single command, as observed by a notification consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandNotificationStatus {
    Queued,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandStatusEvent {
    pub session_id: String,
    pub command_id: String,
    pub command: String,
    pub status: CommandNotificationStatus,
    pub progress: Option<String>,
    pub message: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandHeartbeatEvent {
    pub session_id: String,
    pub command_id: String,
    pub command: String,
    pub elapsed_seconds: f64,
    pub elapsed_display: String,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecoveryEvent {
    pub session_id: String,
    pub reason: String,
    pub step: String,
    pub success: bool,
    pub message: String,
    pub affected_commands: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerHealthEvent {
    pub session_id: String,
    pub status: String,
    pub adapter_active: bool,
    pub queue_size: usize,
    pub active_commands: usize,
    pub uptime_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    Created,
    Closed,
    IdleExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub event_type: SessionEventType,
    pub message: String,
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CommandStatusEvent {
    pub fn new(
        session_id: impl Into<String>,
        command_id: impl Into<String>,
        command: impl Into<String>,
        status: CommandNotificationStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            command_id: command_id.into(),
            command: command.into(),
            status,
            progress: None,
            message: None,
            result: None,
            error: None,
            timestamp: now(),
        }
    }

    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// The single outbound trait the core depends on. Transport adapters decide
/// how (or whether) to deliver each category to a connected client.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn command_status(&self, event: CommandStatusEvent);
    async fn command_heartbeat(&self, event: CommandHeartbeatEvent);
    async fn session_recovery(&self, event: SessionRecoveryEvent);
    async fn server_health(&self, event: ServerHealthEvent);
    async fn session_event(&self, event: SessionEvent);
}

/// A sink that discards every event. Used by core-only tests and as a safe
/// default before a transport attaches a real sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn command_status(&self, _event: CommandStatusEvent) {}
    async fn command_heartbeat(&self, _event: CommandHeartbeatEvent) {}
    async fn session_recovery(&self, _event: SessionRecoveryEvent) {}
    async fn server_health(&self, _event: ServerHealthEvent) {}
    async fn session_event(&self, _event: SessionEvent) {}
}
