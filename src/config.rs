//! Process-start configuration for the execution engine.
//!
//! Every knob named in the specification's data model lives here. Values are
//! process-start configuration only — never per-request, per-session
//! overrides are not part of this contract. Construct via [`EngineConfig::parse`]
//! (CLI flags / environment variables, `clap`) when running as the server
//! binary, or [`EngineConfig::default`] for embedding/tests.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-wide configuration, shared by every session's execution engine.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "mcp-nexus-core", about = "MCP server fronting the CDB debugger")]
pub struct EngineConfig {
    /// Path to the cdb.exe binary (or a compatible shim for testing).
    #[arg(long, env = "MCP_NEXUS_CDB_PATH", default_value = "cdb.exe")]
    pub cdb_path: String,

    /// Default symbol path handed to a freshly started adapter.
    #[arg(long, env = "MCP_NEXUS_SYMBOL_PATH", default_value = "")]
    pub default_symbol_path: String,

    /// Per-command expiry after a command enters Executing.
    #[arg(long, env = "MCP_NEXUS_COMMAND_TIMEOUT_SECS", default_value_t = 600)]
    pub command_timeout_secs: u64,

    /// Whether compatible commands may be coalesced into a single CDB round-trip.
    #[arg(long, env = "MCP_NEXUS_BATCH_ENABLED", default_value_t = true)]
    pub batch_enabled: bool,

    /// Maximum number of commands batched into one CDB submission.
    #[arg(long, env = "MCP_NEXUS_BATCH_MAX_SIZE", default_value_t = 5)]
    pub batch_max_size: usize,

    /// Maximum delay to accumulate a batch before firing with what's present.
    #[arg(long, env = "MCP_NEXUS_BATCH_WAIT_SECS", default_value_t = 2)]
    pub batch_wait_secs: u64,

    /// Command prefixes that must always run solo (case-insensitive).
    #[arg(long, env = "MCP_NEXUS_BATCH_EXCLUDED", value_delimiter = ',', default_values_t = default_batch_excluded())]
    pub batch_excluded: Vec<String>,

    /// Minimum gap between adapter responsiveness probes.
    #[arg(long, env = "MCP_NEXUS_HEALTH_CHECK_INTERVAL_SECS", default_value_t = 60)]
    pub health_check_interval_secs: u64,

    /// Reuse the last health verdict within this window.
    #[arg(long, env = "MCP_NEXUS_HEALTH_CACHE_TTL_SECS", default_value_t = 30)]
    pub health_cache_ttl_secs: u64,

    /// Recovery attempts allowed before giving up.
    #[arg(long, env = "MCP_NEXUS_RECOVERY_MAX_ATTEMPTS", default_value_t = 3)]
    pub recovery_max_attempts: u32,

    /// Refuse a new recovery attempt this long after the last one.
    #[arg(long, env = "MCP_NEXUS_RECOVERY_COOLDOWN_SECS", default_value_t = 300)]
    pub recovery_cooldown_secs: u64,

    /// Exponential backoff base for restart attempts (attempt n = base * 2^(n-1)).
    #[arg(long, env = "MCP_NEXUS_RESTART_BASE_DELAY_SECS", default_value_t = 2)]
    pub restart_base_delay_secs: u64,

    /// Maximum window to wait for the adapter's first prompt during startup.
    #[arg(long, env = "MCP_NEXUS_STARTUP_TIMEOUT_SECS", default_value_t = 30)]
    pub startup_timeout_secs: u64,

    /// Ceiling applied to the batch timeout scaling rule (command_timeout * N).
    #[arg(long, env = "MCP_NEXUS_BATCH_TIMEOUT_CEILING_SECS", default_value_t = 1800)]
    pub batch_timeout_ceiling_secs: u64,

    /// Number of `get_result` observations a terminal record must see before
    /// it becomes eligible for retirement (in addition to the age floor).
    #[arg(long, env = "MCP_NEXUS_RETENTION_OBSERVATIONS", default_value_t = 1)]
    pub retention_observations: u32,

    /// Elapsed Executing duration after which heartbeat notifications begin.
    #[arg(long, env = "MCP_NEXUS_HEARTBEAT_THRESHOLD_SECS", default_value_t = 30)]
    pub heartbeat_threshold_secs: u64,

    /// Cadence at which heartbeat notifications repeat for a still-running command.
    #[arg(long, env = "MCP_NEXUS_HEARTBEAT_INTERVAL_SECS", default_value_t = 15)]
    pub heartbeat_interval_secs: u64,
}

fn default_batch_excluded() -> Vec<String> {
    vec![
        "!analyze".to_string(),
        "!dump".to_string(),
        "!heap".to_string(),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cdb_path: "cdb.exe".to_string(),
            default_symbol_path: String::new(),
            command_timeout_secs: 600,
            batch_enabled: true,
            batch_max_size: 5,
            batch_wait_secs: 2,
            batch_excluded: default_batch_excluded(),
            health_check_interval_secs: 60,
            health_cache_ttl_secs: 30,
            recovery_max_attempts: 3,
            recovery_cooldown_secs: 300,
            restart_base_delay_secs: 2,
            startup_timeout_secs: 30,
            batch_timeout_ceiling_secs: 1800,
            retention_observations: 1,
            heartbeat_threshold_secs: 30,
            heartbeat_interval_secs: 15,
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs(self.batch_wait_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.health_cache_ttl_secs)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown_secs)
    }

    pub fn restart_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_secs(self.restart_base_delay_secs.saturating_mul(factor))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Effective timeout for a batch of `n` commands: `min(command_timeout * n, ceiling)`.
    pub fn batch_timeout(&self, n: usize) -> Duration {
        let scaled = self.command_timeout_secs.saturating_mul(n as u64);
        Duration::from_secs(scaled.min(self.batch_timeout_ceiling_secs))
    }

    pub fn heartbeat_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat_threshold_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Case-insensitive, prefix-only match against `batch_excluded`.
    pub fn is_batch_excluded(&self, command: &str) -> bool {
        let trimmed = command.trim_start();
        self.batch_excluded
            .iter()
            .any(|prefix| trimmed.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()))
    }
}
