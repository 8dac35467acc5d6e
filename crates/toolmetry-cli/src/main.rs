//! Instrumented MCP tool server.
//!
//! Usage:
//! ```bash
//! toolmetry serve                 # Serve over streamable HTTP on 127.0.0.1:3333/mcp
//! toolmetry serve --stdio         # Serve over stdio
//! toolmetry tools                 # Show which tools the capability gate exposes
//! toolmetry --log-format json serve
//! ```
//!
//! Analytics is configured through `toolmetry.toml` and the `POSTHOG_*` and
//! `TOOLMETRY_*` environment variables. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod analytics;
mod commands;
mod inventory;

#[derive(Debug, Parser)]
#[command(name = "toolmetry", author, version, about)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the instrumented tools over MCP
    Serve(commands::serve::ServeArgs),

    /// Show which tools would be exposed and why
    Tools(commands::tools::ToolsArgs),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serve(_) => f.debug_tuple("Serve").finish(),
            Self::Tools(_) => f.debug_tuple("Tools").finish(),
        }
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("info".parse().context("failed to parse log directive")?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match &cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Tools(args) => commands::tools::run(args).await,
    }
}
