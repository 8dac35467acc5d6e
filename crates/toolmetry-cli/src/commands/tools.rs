//! `tools` command: shows which tools the server would expose.
//!
//! Runs the same startup path as `serve` (config, tracker, capability gate)
//! and prints one row per candidate tool instead of serving it.

use std::{fmt::Write as _, path::PathBuf};

use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use serde_json::json;
use toolmetry_core::{FlagResolution, GateDecision};

use crate::analytics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Command-line arguments for the `tools` subcommand.
#[derive(Args)]
pub struct ToolsArgs {
    /// Path to an analytics config file (defaults to resolving `toolmetry.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Skip flag lookups; gated tools show as unresolved.
    #[arg(long, default_value_t = false)]
    pub no_analytics: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

pub async fn run(args: &ToolsArgs) -> Result<()> {
    let mut config = analytics::load_config(args.config.as_deref())?;
    if args.no_analytics {
        config.disabled = true;
    }
    let tracker = analytics::build_tracker(&config)?;
    let runtime = super::build_runtime(&config, tracker).await?;

    let output = match args.format {
        OutputFormat::Table => render_table(runtime.gate_decisions()),
        OutputFormat::Json => render_json(runtime.gate_decisions())?,
    };
    println!("{output}");

    runtime.shutdown().await;
    Ok(())
}

fn resolution_label(resolution: Option<&FlagResolution>) -> String {
    resolution.map_or_else(|| "-".to_string(), ToString::to_string)
}

fn render_table(decisions: &[GateDecision]) -> String {
    if decisions.is_empty() {
        return "No tools registered".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<28} {:<8} {}",
        style("TOOL").bold(),
        style("GATE").bold(),
        style("EXPOSED").bold(),
        style("RESOLUTION").bold()
    );
    let _ = writeln!(out, "{}", "-".repeat(80));

    for decision in decisions {
        let exposed = if decision.admitted {
            style("yes").green()
        } else {
            style("no").red()
        };
        let _ = writeln!(
            out,
            "{:<16} {:<28} {:<8} {}",
            decision.tool,
            decision.gate.to_string(),
            exposed,
            resolution_label(decision.resolution.as_ref())
        );
    }

    let exposed = decisions.iter().filter(|d| d.admitted).count();
    let _ = write!(
        out,
        "\n{} {exposed} of {} tool(s) exposed",
        style("✓").green(),
        decisions.len()
    );
    out
}

fn render_json(decisions: &[GateDecision]) -> Result<String> {
    let rows: Vec<_> = decisions
        .iter()
        .map(|decision| {
            json!({
                "tool": decision.tool,
                "gate": decision.gate,
                "resolution": decision.resolution.as_ref().map(ToString::to_string),
                "exposed": decision.admitted,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}
