//! outpost-agent entry point.
//!
//! Boots one caching agent over SQLite storage and exposes its event entry
//! points as MCP tools on the stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use anyhow::Result;
use outpost_core::AgentConfig;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod host;
mod mailbox;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AgentConfig::load()?;
    tracing::info!(
        scope = %config.scope_url,
        db = %config.db_path.display(),
        "Starting outpost agent on stdio transport"
    );

    let host = host::AgentHost::open(&config).await?;
    host.driver.on_install();
    host.settle(host.driver.on_activate(), false).await;

    let handler = handler::OutpostServer::new(host);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
