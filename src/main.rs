//! Entry point for the mcp-nexus-core MCP server.
//!
//! Initializes tracing (to stderr, so it doesn't interfere with MCP stdio
//! transport), parses process-start configuration, and serves on
//! stdin/stdout.

mod tools;

use anyhow::Result;
use clap::Parser;
use mcp_nexus_core::EngineConfig;
use rmcp::{transport::stdio, ServiceExt};
use tools::McpNexusServer;
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is used for MCP JSON-RPC).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = EngineConfig::parse();
    tracing::info!(
        cdb_path = %config.cdb_path,
        "starting mcp-nexus-core MCP server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = McpNexusServer::new(config);
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    tracing::info!("mcp-nexus-core server shut down");
    Ok(())
}
