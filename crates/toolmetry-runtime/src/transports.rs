//! Transports that expose a [`LocalRuntime`](crate::LocalRuntime) to remote
//! callers.
//!
//! A transport only translates: it lists what the runtime lists and forwards
//! calls, so gating and instrumentation apply the same way whichever
//! transport is used.

/// Model Context Protocol (MCP) transport implementation.
///
/// Provides `McpService`, an `rmcp` server handler that can be mounted as a
/// streamable HTTP service or served over stdio. Requires the `mcp` feature.
#[cfg(feature = "mcp")]
pub mod mcp;
