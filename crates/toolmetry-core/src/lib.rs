//! Instrumentation and capability gating for MCP tool servers.
//!
//! Every tool a server exposes can be wrapped so that each invocation is
//! timed and reported to an analytics backend without changing what the
//! caller sees. The same backend answers boolean flags that decide, once at
//! startup, which gated tools the server exposes at all.
//!
//! # Key Components
//!
//! - **Tracking contract**: [`Tracker`], implemented by real backends and by
//!   the [`NoopTracker`] used when analytics is not configured
//! - **Instrumentation**: [`instrument`] and [`Instrumenter`] wrap an async
//!   operation and report its outcome
//! - **Anonymization**: [`anonymize_arguments`] redacts argument values
//!   before they reach an error report
//! - **Capability gate**: [`CapabilityGate`] resolves [`ToolGate`]s against
//!   remote flags with a bounded wait
//! - **Tool registry**: [`ToolRegistry`] holds the admitted tools
//! - **Configuration**: [`AnalyticsConfig`] with file and environment
//!   resolution
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use toolmetry_core::{Instrumenter, NoopTracker};
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let instrumenter = Instrumenter::new(Arc::new(NoopTracker::new()));
//! let total = instrumenter
//!     .run("sumStock", async { Ok::<_, std::io::Error>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod anonymize;
mod config;
mod gate;
mod identity;
mod instrument;
mod registry;
mod tracking;

/// In-memory tracker for tests in this and downstream crates.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// JSON object used for tool arguments and schemas.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

pub use anonymize::{REDACTED, anonymize_arguments};
pub use config::{AnalyticsConfig, ConfigError, DEFAULT_POSTHOG_HOST};
pub use gate::{
    CapabilityGate, DEFAULT_FLAG_TIMEOUT, FlagResolution, GateDecision, ToolGate,
    UnresolvedReason, resolve_flag,
};
pub use identity::Identity;
pub use instrument::{Instrumenter, instrument};
pub use registry::{
    InflightRequestGuard, RegisteredTool, RegistryError, ToolDefinition, ToolError, ToolFuture,
    ToolHandler, ToolRegistry, TypedHandler, typed,
};
pub use tracking::{
    ErrorDetail, ErrorReport, InvocationOutcome, NoopTracker, Properties, PropertyValue, Tracker,
    TrackingError,
};
