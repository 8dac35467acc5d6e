//! `serve` command: runs the instrumented MCP server.
//!
//! The server runs in one of two modes:
//!
//! - **HTTP mode**: streamable HTTP endpoint on a configurable address/path
//! - **stdio mode**: standard input/output for clients that spawn the server
//!
//! Startup loads the analytics config, builds the tracker, and resolves the
//! capability gate before the first request is accepted. On shutdown the
//! server drains in-flight calls and then shuts the tracker down.

use std::{future::Future, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use rmcp::{
    service::ServiceExt,
    transport::{stdio, streamable_http_server::StreamableHttpServerConfig},
};
use tokio::signal;
use toolmetry_runtime::{LocalRuntime, transports::mcp::McpService};
use tracing::info;

use crate::analytics;

/// Command-line arguments for the `serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Path to an analytics config file (defaults to resolving `toolmetry.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(short = 'a', long, default_value = "127.0.0.1:3333")]
    pub addr: String,

    /// HTTP path for the MCP endpoint.
    #[arg(long, default_value = "/mcp")]
    pub path: String,

    /// Run in stdio mode instead of HTTP mode.
    #[arg(long, default_value_t = false)]
    pub stdio: bool,

    /// Run without an analytics backend even if one is configured.
    ///
    /// Gated tools are hidden in this mode.
    #[arg(long, default_value_t = false)]
    pub no_analytics: bool,
}

/// Runs the server until Ctrl+C.
pub async fn run(args: &ServeArgs) -> Result<()> {
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal");
    };
    run_with_shutdown(args, shutdown).await
}

/// Runs the server until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if:
/// - The config file cannot be loaded
/// - The analytics backend cannot be initialized
/// - The server fails to bind to the specified address
/// - The server encounters an error during operation
async fn run_with_shutdown<F>(args: &ServeArgs, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut config = analytics::load_config(args.config.as_deref())?;
    if args.no_analytics {
        config.disabled = true;
    }
    let tracker = analytics::build_tracker(&config)?;
    let runtime = super::build_runtime(&config, tracker).await?;

    if args.stdio {
        return run_stdio(runtime).await;
    }

    println!("{} Starting MCP server...", style("→").cyan());
    println!(
        "{} Exposing {} tool(s)",
        style("✓").green().bold(),
        runtime.registry().len()
    );

    let addr: SocketAddr = args
        .addr
        .parse()
        .with_context(|| format!("invalid --addr value: {}", args.addr))?;
    let path = normalize_path(&args.path);

    let service = McpService::from_runtime(runtime.clone()).streamable_http_service_with_config(
        StreamableHttpServerConfig {
            // Stateless mode keeps compatibility with MCP clients that don't send
            // the initialized notification after initialize.
            stateful_mode: false,
            ..Default::default()
        },
    );
    let router = axum::Router::new().nest_service(path.as_str(), service);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind MCP server on {addr}"))?;
    let local_addr = listener.local_addr().unwrap_or(addr);

    info!(address = %local_addr, path = %path, "Starting MCP server");

    println!(
        "{} MCP server running on http://{}{}",
        style("✓").green().bold(),
        local_addr,
        path
    );
    println!("Press Ctrl+C to stop\n");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("mcp server error")?;

    info!("Draining inflight requests");
    runtime.shutdown().await;

    info!("Toolmetry MCP server stopped");
    Ok(())
}

/// Runs the MCP server over stdio.
///
/// Startup messages go to stderr so stdout carries only protocol traffic.
async fn run_stdio(runtime: LocalRuntime) -> Result<()> {
    eprintln!("{} Starting MCP stdio server...", style("→").cyan());
    eprintln!(
        "{} Exposing {} tool(s)",
        style("✓").green().bold(),
        runtime.registry().len()
    );

    let service = McpService::from_runtime(runtime.clone());
    let (stdin, stdout) = stdio();

    let running = service
        .serve((stdin, stdout))
        .await
        .context("failed to start MCP stdio server")?;

    eprintln!("{} MCP stdio server running", style("✓").green().bold());
    eprintln!("Press Ctrl+C to stop\n");

    let cancel = running.cancellation_token();
    let mut waiting = Box::pin(running.waiting());

    tokio::select! {
        result = &mut waiting => {
            result.context("mcp stdio server exited")?;
        }
        _ = signal::ctrl_c() => {
            cancel.cancel();
            let _ = waiting.await;
        }
    }

    info!("Draining inflight requests");
    runtime.shutdown().await;
    info!("Toolmetry MCP stdio server stopped");
    Ok(())
}

/// Normalizes an HTTP path to ensure it starts with `/`.
///
/// An empty path falls back to `/mcp`.
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/mcp".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
