//! The error taxonomy shared by every component of the execution engine.
//!
//! Every fallible operation in the core returns `Result<T, CoreError>`. Per-
//! command outcomes (`Cancelled`, `TimedOut`, a batch parse gap) are *kinds*,
//! not `CoreError` variants: they're contained to the affected command
//! record as `CommandState`/`BatchOutcome` and never bubble up through a
//! `Result`, so they have no representation here. `CoreError` covers the
//! session/adapter-level faults that do cross a `Result` boundary:
//! validation and lifecycle errors, adapter-level faults that trigger
//! recovery (`AdapterFault`, `Unresponsive`), and the degraded states that
//! make submission itself fail.

use thiserror::Error;

/// The error taxonomy for the isolated command execution engine.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("command already in a terminal state")]
    AlreadyTerminal,

    #[error("session is closed")]
    Closed,

    #[error("adapter fault: {0}")]
    AdapterFault(String),

    #[error("adapter unresponsive")]
    Unresponsive,

    #[error("recovery exhausted after {attempts} attempt(s)")]
    RecoveryExhausted { attempts: u32 },

    #[error("session is degraded: {reason}")]
    Degraded { reason: String },

    #[error("adapter startup failed: {stderr_tail}")]
    StartupFailed { stderr_tail: String },
}

impl CoreError {
    /// Best-effort mapping from other errors raised while reading/writing the
    /// adapter's stdio (`std::io::Error`) onto `AdapterFault`.
    pub fn adapter_fault(err: impl std::fmt::Display) -> Self {
        CoreError::AdapterFault(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
