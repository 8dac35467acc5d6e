//! CLI command implementations for `toolmetry`.
//!
//! - **`serve`**: run the MCP server with the demo inventory toolset
//! - **`tools`**: show which tools the capability gate would expose
//!
//! Each command module exports an `*Args` struct implementing `clap::Args`
//! and an async `run` function.

use std::sync::Arc;

use anyhow::{Context, Result};
use toolmetry_core::{AnalyticsConfig, Tracker};
use toolmetry_runtime::{LocalRuntime, RuntimeBuilder};

use crate::inventory::{self, Inventory};

pub mod serve;
pub mod tools;

/// Builds the runtime for the demo toolset. The capability gate runs here.
async fn build_runtime(config: &AnalyticsConfig, tracker: Arc<dyn Tracker>) -> Result<LocalRuntime> {
    let builder = RuntimeBuilder::new()
        .with_tracker(tracker)
        .with_anonymize(config.anonymize)
        .with_flag_timeout(config.flag_timeout());

    inventory::register(builder, Arc::new(Inventory::sample()))
        .build_local()
        .await
        .context("failed to initialize runtime")
}
