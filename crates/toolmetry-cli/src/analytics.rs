//! Configuration loading and tracker construction shared by the commands.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use toolmetry_core::{AnalyticsConfig, NoopTracker, Tracker};
use toolmetry_posthog::{PostHogConfig, PostHogTracker};
use tracing::info;

/// Loads analytics config from `path` or, without one, through the usual
/// resolution. Environment overrides apply in both cases.
pub fn load_config(path: Option<&Path>) -> Result<AnalyticsConfig> {
    match path {
        Some(path) => {
            let config = AnalyticsConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
        }
        None => AnalyticsConfig::resolve().context("failed to resolve analytics config"),
    }
}

/// Builds the PostHog tracker when analytics is configured, otherwise the
/// no-op tracker.
pub fn build_tracker(config: &AnalyticsConfig) -> Result<Arc<dyn Tracker>> {
    let Some(posthog) = PostHogConfig::from_analytics(config) else {
        info!(
            reason = disabled_reason(config),
            "Analytics disabled, gated tools will be hidden"
        );
        return Ok(Arc::new(NoopTracker::new()));
    };

    let tracker = PostHogTracker::new(posthog).context("failed to initialize analytics backend")?;
    info!(
        host = %tracker.host(),
        identity = %tracker.identity(),
        anonymize = config.anonymize,
        "Analytics enabled"
    );
    Ok(Arc::new(tracker))
}

fn disabled_reason(config: &AnalyticsConfig) -> &'static str {
    if config.disabled {
        "disabled by configuration or --no-analytics"
    } else {
        "no API key configured"
    }
}
