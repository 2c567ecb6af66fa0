//! MCP tool surface and session directory.
//!
//! Everything the specification calls "out of scope" for the core lives
//! here: MCP tool registration, path preprocessing before a request reaches
//! a [`Session`], and mapping a client-supplied session id to the
//! [`Session`] instance that owns it. One server process hosts N sessions;
//! each is an independent engine sharing nothing but this directory and the
//! notification sink.

use mcp_nexus_core::notify::{
    CommandHeartbeatEvent, CommandStatusEvent, NotificationSink, ServerHealthEvent, SessionEvent, SessionRecoveryEvent,
};
use mcp_nexus_core::session::{CommandOutcome, Session};
use mcp_nexus_core::{path, CoreError, EngineConfig};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A sink that logs every event via `tracing` rather than pushing a
/// transport-specific notification. Delivering true server-initiated MCP
/// notifications requires a live client peer handle that only exists once
/// a tool call is in flight; logging keeps every event observable (and the
/// contract testable) without guessing at that wiring.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for McpNotificationSink {
    async fn command_status(&self, event: CommandStatusEvent) {
        tracing::info!(
            session = %event.session_id,
            command_id = %event.command_id,
            status = ?event.status,
            "commandStatus"
        );
    }

    async fn command_heartbeat(&self, event: CommandHeartbeatEvent) {
        tracing::debug!(
            session = %event.session_id,
            command_id = %event.command_id,
            elapsed = %event.elapsed_display,
            "commandHeartbeat"
        );
    }

    async fn session_recovery(&self, event: SessionRecoveryEvent) {
        tracing::warn!(
            session = %event.session_id,
            step = %event.step,
            success = event.success,
            message = %event.message,
            "sessionRecovery"
        );
    }

    async fn server_health(&self, event: ServerHealthEvent) {
        tracing::info!(session = %event.session_id, status = %event.status, "serverHealth");
    }

    async fn session_event(&self, event: SessionEvent) {
        tracing::info!(session = %event.session_id, event = ?event.event_type, "sessionEvent");
    }
}

/// Maps session ids to the live `Session` that owns them. The core is
/// instantiated per session; this directory is the only place that knows
/// about more than one at a time.
#[derive(Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, config: EngineConfig, sink: Arc<dyn NotificationSink>, target: &str) -> Result<String, CoreError> {
        let session = Session::open(config, sink, target).await?;
        let id = session.id().to_string();
        self.sessions.write().await.insert(id.clone(), Arc::new(session));
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn close(&self, id: &str, reason: &str) -> bool {
        let session = self.sessions.write().await.remove(id);
        match session {
            Some(session) => {
                session.close(reason).await;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct OpenSessionParams {
    /// Path to the crash dump to load. Accepts WSL-style (`/mnt/c/...`) or
    /// native Windows paths; WSL paths are translated automatically.
    pub target: String,
    /// Symbol search path override for this session (`.sympath` argument syntax).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_path: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SubmitCommandParams {
    pub session_id: String,
    /// The WinDBG/CDB command text, e.g. `lm`, `!analyze -v`, `!threads`.
    pub command: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CancelCommandParams {
    pub session_id: String,
    pub command_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetCommandResultParams {
    pub session_id: String,
    pub command_id: String,
    /// Seconds to wait for the command to finish before returning whatever
    /// snapshot is current. Omit or 0 for an immediate, non-blocking poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListCommandsParams {
    pub session_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CloseSessionParams {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionDiagnosticsParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenSessionResult {
    session_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct SubmitCommandResult {
    command_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct CancelCommandResult {
    command_id: String,
    cancelled: bool,
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result(err: CoreError) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(err.to_string())]))
}

/// Create every local directory token in a `.sympath`-style argument that's
/// absent, skipping UNC/URL-schemed tokens (spec §6). Best-effort: a failed
/// `create_dir_all` is logged, not fatal — CDB will surface the real error
/// itself if the path turns out to matter.
async fn create_local_directories(symbol_path: &str) {
    for dir in path::local_directory_tokens(symbol_path) {
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(dir = %dir, error = %err, "failed to create symbol path directory");
        }
    }
}

#[derive(Clone)]
pub struct McpNexusServer {
    directory: SessionDirectory,
    config: EngineConfig,
    sink: Arc<dyn NotificationSink>,
    tool_router: ToolRouter<McpNexusServer>,
}

impl McpNexusServer {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            directory: SessionDirectory::new(),
            config,
            sink: Arc::new(McpNotificationSink),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl McpNexusServer {
    #[tool(
        description = "Open a debugging session against a crash dump, starting a dedicated CDB process. WSL-style paths (/mnt/c/...) are translated to Windows form automatically. Returns a session_id used by every other tool in this server."
    )]
    async fn open_session(
        &self,
        Parameters(params): Parameters<OpenSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let target = path::translate_wsl_path(&params.target);
        if let Err(err) = path::reject_unsafe_path(&target) {
            return err_result(err);
        }

        let mut config = self.config.clone();
        if let Some(symbol_path) = params.symbol_path {
            if let Err(err) = path::reject_unsafe_path(&symbol_path) {
                return err_result(err);
            }
            config.default_symbol_path = symbol_path;
        }

        create_local_directories(&config.default_symbol_path).await;

        tracing::info!(target = %target, "open_session");
        match self.directory.open(config, self.sink.clone(), &target).await {
            Ok(session_id) => json_content(&OpenSessionResult { session_id }),
            Err(err) => err_result(err),
        }
    }

    #[tool(
        description = "Submit a WinDBG/CDB command to a session. Returns immediately with an opaque command_id; the command runs asynchronously (CDB commands like !analyze can take minutes). Poll with get_command_result."
    )]
    async fn submit_command(
        &self,
        Parameters(params): Parameters<SubmitCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(session) = self.directory.get(&params.session_id).await else {
            return err_result(CoreError::NotFound(params.session_id));
        };
        match session.submit(&params.command).await {
            Ok(command_id) => json_content(&SubmitCommandResult { command_id }),
            Err(err) => err_result(err),
        }
    }

    #[tool(
        description = "Cancel a previously submitted command. A still-queued command is cancelled immediately; an executing one is cancelled once CDB acknowledges a soft break."
    )]
    async fn cancel_command(
        &self,
        Parameters(params): Parameters<CancelCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(session) = self.directory.get(&params.session_id).await else {
            return err_result(CoreError::NotFound(params.session_id));
        };
        let reason = params.reason.unwrap_or_else(|| "user".to_string());
        match session.cancel(&params.command_id, &reason).await {
            Ok(cancelled) => json_content(&CancelCommandResult {
                command_id: params.command_id,
                cancelled,
            }),
            Err(err) => err_result(err),
        }
    }

    #[tool(
        description = "Poll a submitted command's status. With wait_seconds omitted, returns immediately whether pending or terminal. With wait_seconds set, blocks up to that long for the command to finish before returning the current snapshot."
    )]
    async fn get_command_result(
        &self,
        Parameters(params): Parameters<GetCommandResultParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(session) = self.directory.get(&params.session_id).await else {
            return err_result(CoreError::NotFound(params.session_id));
        };
        let wait = Duration::from_secs(params.wait_seconds.unwrap_or(0));
        match session.get_result(&params.command_id, wait).await {
            Ok(CommandOutcome::Pending) => json_content(&CommandOutcome::Pending),
            Ok(outcome @ CommandOutcome::Terminal(_)) => json_content(&outcome),
            Err(err) => err_result(err),
        }
    }

    #[tool(description = "List recent commands submitted to a session along with their current state.")]
    async fn list_commands(
        &self,
        Parameters(params): Parameters<ListCommandsParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(session) = self.directory.get(&params.session_id).await else {
            return err_result(CoreError::NotFound(params.session_id));
        };
        json_content(&session.list_commands().await)
    }

    #[tool(
        description = "Close a debugging session: cancels pending commands, waits briefly for any in-flight command to finish, then stops the CDB process."
    )]
    async fn close_session(
        &self,
        Parameters(params): Parameters<CloseSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let reason = params.reason.unwrap_or_else(|| "client requested".to_string());
        let closed = self.directory.close(&params.session_id, &reason).await;
        json_content(&serde_json::json!({ "session_id": params.session_id, "closed": closed }))
    }

    #[tool(
        description = "Return session-level diagnostics: adapter state, restart count, queue size, command counters, and recovery attempts. Use to understand whether a session is degraded before retrying failed submissions."
    )]
    async fn session_diagnostics(
        &self,
        Parameters(params): Parameters<SessionDiagnosticsParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(session) = self.directory.get(&params.session_id).await else {
            return err_result(CoreError::NotFound(params.session_id));
        };
        json_content(&session.diagnostics().await)
    }
}

#[tool_handler]
impl ServerHandler for McpNexusServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-nexus-core".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "mcp-nexus-core mediates between an AI client and the Windows CDB debugger.\n\n\
                 Call open_session with a crash dump path to start a session, then submit_command \
                 to run WinDBG commands against it. Every command runs asynchronously: \
                 submit_command returns a command_id immediately, and get_command_result polls for \
                 the outcome (pass wait_seconds to block instead of polling tightly). Commands that \
                 don't exclude batching (see session_diagnostics for the excluded prefixes, e.g. \
                 !analyze, !dump, !heap) may be coalesced with others for efficiency; this is \
                 transparent to the caller. Call close_session when finished with a dump to free the \
                 underlying CDB process."
                    .to_string(),
            ),
        }
    }
}
