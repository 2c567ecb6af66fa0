//! Core isolated command execution engine for a CDB-backed MCP session.
//!
//! This crate is the per-session engine described by the specification's
//! component table: one [`session::Session`] owns one [`adapter::DebuggerAdapter`]
//! (a CDB child process), serializes commands against it through a
//! [`queue::QueueProcessor`], and recovers from faults via
//! [`recovery::RecoveryOrchestrator`]. Transport concerns (MCP tool
//! registration, JSON-RPC framing, the session directory mapping client
//! requests to a `Session`) live in the `mcp-nexus-core` binary, not here.

pub mod adapter;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod ids;
pub mod notify;
pub mod path;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod timeout;

pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use session::Session;
