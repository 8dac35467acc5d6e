//! Runtime that serves gated, instrumented tools.
//!
//! [`RuntimeBuilder`] collects candidate tools, asks the capability gate which
//! of them to expose, and registers only the admitted ones. The resulting
//! [`LocalRuntime`] routes every call through the instrumentation layer so
//! each invocation produces exactly one analytics report.
//!
//! With the `mcp` feature (on by default) the runtime can be served over the
//! Model Context Protocol, see [`transports::mcp::McpService`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use toolmetry_core::{NoopTracker, ToolDefinition, ToolGate};
//! use toolmetry_runtime::RuntimeBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = RuntimeBuilder::new()
//!     .with_tracker(Arc::new(NoopTracker::new()))
//!     .with_tool(ToolDefinition::new("ping"), |_args| async { Ok(json!("pong")) })
//!     .with_tool(
//!         ToolDefinition::new("purge").with_gate(ToolGate::flag("purge-tools")),
//!         |_args| async { Ok(json!(null)) },
//!     )
//!     .build_local()
//!     .await?;
//!
//! // Without an analytics backend gated tools are never exposed.
//! assert_eq!(runtime.list_tools().len(), 1);
//! # Ok(())
//! # }
//! ```

mod builder;
mod runtime;
pub mod transports;

pub use builder::{RuntimeBuildError, RuntimeBuilder};
pub use runtime::{CallError, CallMetadata, LocalRuntime};
