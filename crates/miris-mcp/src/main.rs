//! Miris MCP Server
//!
//! MCP server that exposes the Miris analytics layer (protocol flows,
//! arbitrage, TVL, temporal patterns, data quality) as tools for AI agents.
//! Feeds come either inline with each call or from a snapshot file that is
//! reloaded in the background. Implements the MCP protocol using pure
//! JSON-RPC over stdio.

mod config;
mod error;
mod snapshot;
mod tools;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::AppConfig;
use snapshot::SnapshotPoller;
use tools::{handle_request, JsonRpcRequest, MirisTools};

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is for MCP protocol)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("miris_mcp=info,miris_core=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Miris MCP Server");

    let rt = Runtime::new()?;

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let params = config.analysis.to_params();
    params.validate()?;

    tracing::info!(
        snapshot_path = ?config.snapshot.path,
        poll_interval_secs = config.snapshot.poll_interval_secs,
        tvl_days = params.tvl_days,
        match_window_secs = params.flow_match_window_secs,
        "Configuration loaded"
    );

    // Background reload of the feed snapshot, when one is configured
    let mut poller = config
        .snapshot
        .path
        .clone()
        .map(|path| SnapshotPoller::new(path, &config.snapshot));

    if let Some(poller) = poller.as_mut() {
        rt.block_on(async { poller.start() });
    } else {
        tracing::info!("No snapshot path configured, tools require inline feeds");
    }

    let tools = Arc::new(MirisTools::new(poller.as_ref().map(SnapshotPoller::shared), params));

    tracing::info!("MCP server ready, listening on stdio");

    // Main loop: read JSON-RPC requests from stdin, write responses to stdout
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "Error reading stdin");
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Error parsing request");
                continue;
            }
        };

        tracing::debug!(method = %request.method, "Received request");

        let tools_clone = Arc::clone(&tools);
        let response = rt.block_on(async move { handle_request(&tools_clone, request).await });

        // Notifications get no response
        if let Some(response) = response {
            let response_str = serde_json::to_string(&response).unwrap_or_default();
            if let Err(e) = writeln!(stdout, "{}", response_str) {
                tracing::error!(error = %e, "Error writing response");
            }
            if let Err(e) = stdout.flush() {
                tracing::error!(error = %e, "Error flushing stdout");
            }
        }
    }

    if let Some(mut poller) = poller {
        rt.block_on(poller.stop());
    }

    tracing::info!("MCP server shutting down");
    Ok(())
}
