//! Startup-time capability gating driven by remote boolean flags.
//!
//! Each tool carries a [`ToolGate`]. Ungated tools are always exposed. A tool
//! gated on a flag is exposed only if the tracker answers `true` for that flag
//! within a bounded wait. Every other outcome (no backend, a failed query, a
//! timeout) resolves to "not exposed", and is logged differently from an
//! explicit `false` so operators can tell a disabled flag from a broken one.
//!
//! Decisions are taken once, while the server starts, and are never
//! re-evaluated; flipping the flag remotely has no effect until restart.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{registry::ToolDefinition, tracking::Tracker};

/// Upper bound on a single flag query during startup.
pub const DEFAULT_FLAG_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether a tool is always exposed or depends on a flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGate {
    #[default]
    Always,
    Flag(String),
}

impl ToolGate {
    pub fn flag(name: impl Into<String>) -> Self {
        Self::Flag(name.into())
    }

    pub fn flag_name(&self) -> Option<&str> {
        match self {
            Self::Always => None,
            Self::Flag(name) => Some(name),
        }
    }
}

impl fmt::Display for ToolGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("always"),
            Self::Flag(name) => write!(f, "flag:{name}"),
        }
    }
}

/// Why a flag could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// No analytics backend is configured.
    NoBackend,
    /// The backend did not answer within the bound.
    Timeout(Duration),
    /// The backend answered with an error.
    Failed(String),
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBackend => f.write_str("no analytics backend configured"),
            Self::Timeout(bound) => write!(f, "no answer within {}ms", bound.as_millis()),
            Self::Failed(message) => write!(f, "query failed: {message}"),
        }
    }
}

/// Result of looking up a flag at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagResolution {
    Enabled,
    Disabled,
    Unresolved(UnresolvedReason),
}

impl FlagResolution {
    /// Only an explicit `true` from the backend enables a tool.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl fmt::Display for FlagResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::Disabled => f.write_str("disabled"),
            Self::Unresolved(reason) => write!(f, "unresolved ({reason})"),
        }
    }
}

/// Looks up `flag` on `tracker`, waiting at most `timeout`.
///
/// Never fails and never waits longer than the bound.
pub async fn resolve_flag(tracker: &dyn Tracker, flag: &str, timeout: Duration) -> FlagResolution {
    if !tracker.is_enabled() {
        return FlagResolution::Unresolved(UnresolvedReason::NoBackend);
    }

    match tokio::time::timeout(timeout, tracker.query_flag(flag)).await {
        Ok(Ok(true)) => FlagResolution::Enabled,
        Ok(Ok(false)) => FlagResolution::Disabled,
        Ok(Err(error)) => FlagResolution::Unresolved(UnresolvedReason::Failed(error.to_string())),
        Err(_) => FlagResolution::Unresolved(UnresolvedReason::Timeout(timeout)),
    }
}

/// Startup decision for one candidate tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub tool: String,
    pub gate: ToolGate,
    /// `None` for ungated tools, which are never looked up.
    pub resolution: Option<FlagResolution>,
    pub admitted: bool,
}

/// Decides which candidate tools the server exposes.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    tracker: Arc<dyn Tracker>,
    timeout: Duration,
}

impl CapabilityGate {
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            tracker,
            timeout: DEFAULT_FLAG_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decides whether `definition` is exposed.
    pub async fn decide(&self, definition: &ToolDefinition) -> GateDecision {
        let Some(flag) = definition.gate.flag_name() else {
            return GateDecision {
                tool: definition.name.clone(),
                gate: ToolGate::Always,
                resolution: None,
                admitted: true,
            };
        };

        let resolution = resolve_flag(self.tracker.as_ref(), flag, self.timeout).await;
        match &resolution {
            FlagResolution::Enabled => {
                info!(tool = %definition.name, flag, "flag enabled, exposing tool");
            }
            FlagResolution::Disabled => {
                info!(tool = %definition.name, flag, "flag disabled, tool not exposed");
            }
            // Reported once for the whole toolset by the caller.
            FlagResolution::Unresolved(UnresolvedReason::NoBackend) => {
                debug!(tool = %definition.name, flag, "no analytics backend, tool not exposed");
            }
            FlagResolution::Unresolved(reason) => {
                warn!(
                    tool = %definition.name,
                    flag,
                    reason = %reason,
                    "flag could not be resolved, tool not exposed"
                );
            }
        }

        GateDecision {
            tool: definition.name.clone(),
            gate: definition.gate.clone(),
            admitted: resolution.is_enabled(),
            resolution: Some(resolution),
        }
    }
}
