//! Command Registry (component B).
//!
//! Exclusively owns command records, keyed by id. Mutations are atomic with
//! respect to observers; terminal transitions are idempotent. Records
//! persist past completion until retired: a terminal record becomes
//! eligible once it has been observed at least `retention_observations`
//! times *and* its terminal timestamp is at least `2 * command_timeout` old
//! (spec §4.2, and the retention open question resolved in DESIGN.md).

use crate::cancel::{CancelReason, CancelToken};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// The command state machine: `Queued -> Executing -> {terminal states}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Queued,
    Executing,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandState::Completed | CommandState::Failed | CommandState::Cancelled | CommandState::TimedOut
        )
    }
}

/// A full command record. Result fields are written exactly once, when the
/// record transitions into a terminal state.
pub struct CommandRecord {
    pub id: String,
    pub text: String,
    pub state: CommandState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub cancel: CancelToken,
    /// Signaled exactly once, when the record reaches a terminal state.
    pub done: Arc<Notify>,
    observations: u32,
}

impl CommandRecord {
    fn new(id: String, text: String) -> Self {
        Self {
            id,
            text,
            state: CommandState::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            cancel: CancelToken::new(),
            done: Arc::new(Notify::new()),
            observations: 0,
        }
    }
}

/// Immutable snapshot of a command record, safe to hand to callers/serialize.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandSnapshot {
    pub id: String,
    pub text: String,
    pub state: CommandState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl From<&CommandRecord> for CommandSnapshot {
    fn from(r: &CommandRecord) -> Self {
        Self {
            id: r.id.clone(),
            text: r.text.clone(),
            state: r.state,
            submitted_at: r.submitted_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            output: r.output.clone(),
            error: r.error.clone(),
        }
    }
}

/// Thread-safe registry of command records for a single session.
#[derive(Clone)]
pub struct CommandRegistry {
    records: Arc<Mutex<HashMap<String, CommandRecord>>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert a new `Queued` record with the given id (minted by the caller
    /// so session-scoped id generation stays a façade concern) and text.
    pub async fn insert(&self, id: String, text: String) -> CancelToken {
        let record = CommandRecord::new(id.clone(), text);
        let cancel = record.cancel.clone();
        self.records.lock().await.insert(id, record);
        cancel
    }

    pub async fn set_executing(&self, id: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if record.state != CommandState::Queued {
            return Ok(()); // already moved on (e.g. cancelled while waiting) — not an error.
        }
        record.state = CommandState::Executing;
        record.started_at = Some(at);
        Ok(())
    }

    pub async fn complete(&self, id: &str, output: String) -> Result<(), CoreError> {
        self.terminate(id, CommandState::Completed, Some(output), None).await
    }

    pub async fn fail(&self, id: &str, reason: impl Into<String>) -> Result<(), CoreError> {
        self.terminate(id, CommandState::Failed, None, Some(reason.into())).await
    }

    pub async fn cancel(&self, id: &str, reason: &str) -> Result<(), CoreError> {
        let cancel_token = {
            let records = self.records.lock().await;
            records.get(id).map(|r| r.cancel.clone())
        };
        let Some(cancel_token) = cancel_token else {
            return Err(CoreError::NotFound(id.to_string()));
        };
        cancel_token.cancel(CancelReason::User);
        self.terminate(id, CommandState::Cancelled, None, Some(reason.to_string())).await
    }

    pub async fn time_out(&self, id: &str) -> Result<(), CoreError> {
        self.terminate(id, CommandState::TimedOut, None, Some("timeout".to_string())).await
    }

    async fn terminate(
        &self,
        id: &str,
        state: CommandState,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<(), CoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if record.state.is_terminal() {
            return Err(CoreError::AlreadyTerminal);
        }
        record.state = state;
        record.output = output;
        record.error = error;
        record.completed_at = Some(Utc::now());
        record.done.notify_waiters();
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<CommandSnapshot> {
        self.records.lock().await.get(id).map(CommandSnapshot::from)
    }

    /// Fetch a record's cancel token and terminal-notification handle, for
    /// callers that need to await completion without holding the registry lock.
    pub async fn waiter(&self, id: &str) -> Option<(CancelToken, Arc<Notify>)> {
        let records = self.records.lock().await;
        records.get(id).map(|r| (r.cancel.clone(), r.done.clone()))
    }

    /// Mark a terminal record as observed once, returning the instant after
    /// which it becomes eligible for retirement (`None` if not yet terminal,
    /// or if it lacks a completion timestamp).
    pub async fn mark_read(&self, id: &str, retention_observations: u32) -> Option<DateTime<Utc>> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(id)?;
        if !record.state.is_terminal() {
            return None;
        }
        record.observations = record.observations.saturating_add(1);
        if record.observations < retention_observations {
            return None;
        }
        record.completed_at
    }

    pub async fn list(&self) -> Vec<CommandSnapshot> {
        self.records.lock().await.values().map(CommandSnapshot::from).collect()
    }

    /// Sweep retirable records: terminal, observed enough times, and whose
    /// terminal timestamp is at least `2 * command_timeout` old.
    pub async fn retire_expired(&self, retention_observations: u32, command_timeout: Duration) {
        let floor = chrono::Duration::from_std(command_timeout * 2).unwrap_or(chrono::Duration::zero());
        let now = Utc::now();
        let mut records = self.records.lock().await;
        records.retain(|_, record| {
            if !record.state.is_terminal() {
                return true;
            }
            if record.observations < retention_observations {
                return true;
            }
            match record.completed_at {
                Some(completed_at) => now - completed_at < floor,
                None => true,
            }
        });
    }

    pub async fn counters(&self) -> RegistryCounters {
        let records = self.records.lock().await;
        let mut counters = RegistryCounters::default();
        for record in records.values() {
            counters.submitted += 1;
            match record.state {
                CommandState::Queued => counters.queued += 1,
                CommandState::Executing => counters.active += 1,
                _ => counters.terminal += 1,
            }
        }
        counters
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RegistryCounters {
    pub submitted: usize,
    pub queued: usize,
    pub active: usize,
    pub terminal: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_complete_round_trip() {
        let registry = CommandRegistry::new();
        registry.insert("c1".into(), "lm".into()).await;
        registry.set_executing("c1", Utc::now()).await.unwrap();
        registry.complete("c1", "module list".into()).await.unwrap();

        let snapshot = registry.get("c1").await.unwrap();
        assert_eq!(snapshot.state, CommandState::Completed);
        assert_eq!(snapshot.output.as_deref(), Some("module list"));
    }

    #[tokio::test]
    async fn second_terminal_transition_is_already_terminal() {
        let registry = CommandRegistry::new();
        registry.insert("c1".into(), "lm".into()).await;
        registry.complete("c1", "a".into()).await.unwrap();
        let err = registry.complete("c1", "b".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyTerminal));

        // Value from the first completion is retained (idempotence law).
        let snapshot = registry.get("c1").await.unwrap();
        assert_eq!(snapshot.output.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let registry = CommandRegistry::new();
        registry.insert("c1".into(), "lm".into()).await;
        registry.cancel("c1", "user").await.unwrap();
        let err = registry.cancel("c1", "user").await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyTerminal));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let registry = CommandRegistry::new();
        let err = registry.complete("missing", "x".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn retirement_respects_observation_and_age_floor() {
        let registry = CommandRegistry::new();
        registry.insert("c1".into(), "lm".into()).await;
        registry.complete("c1", "out".into()).await.unwrap();

        // Not yet observed: ineligible even with a zero-age floor.
        registry.retire_expired(1, Duration::from_secs(0)).await;
        assert!(registry.get("c1").await.is_some());

        // Observed once, zero-age floor: eligible immediately.
        registry.mark_read("c1", 1).await;
        registry.retire_expired(1, Duration::from_secs(0)).await;
        assert!(registry.get("c1").await.is_none());
    }

    #[tokio::test]
    async fn counters_reflect_state_distribution() {
        let registry = CommandRegistry::new();
        registry.insert("queued".into(), "lm".into()).await;
        registry.insert("executing".into(), "lm".into()).await;
        registry.set_executing("executing", Utc::now()).await.unwrap();
        registry.insert("done".into(), "lm".into()).await;
        registry.complete("done", "x".into()).await.unwrap();

        let counters = registry.counters().await;
        assert_eq!(counters.submitted, 3);
        assert_eq!(counters.queued, 1);
        assert_eq!(counters.active, 1);
        assert_eq!(counters.terminal, 1);
    }
}
