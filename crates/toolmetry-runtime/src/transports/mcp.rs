//! Model Context Protocol (MCP) transport implementation.
//!
//! `McpService` implements the `rmcp::ServerHandler` trait, bridging the MCP
//! protocol with a [`LocalRuntime`]. It handles:
//!
//! - Tool discovery: only tools admitted by the capability gate are listed
//! - Call routing through the runtime, so every call is instrumented
//! - Session extraction from HTTP headers into [`CallMetadata`]
//! - Error translation: a failing tool is an MCP error *result*, an unknown
//!   tool is a protocol error

use std::{borrow::Cow, sync::Arc};

use rmcp::{
    ErrorData, RoleServer,
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, Extensions, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::{
        common::http_header::HEADER_SESSION_ID,
        streamable_http_server::{
            StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
        },
    },
};
use serde_json::Value;
use toolmetry_core::ToolDefinition;

use crate::runtime::{CallError, CallMetadata, LocalRuntime};

/// MCP server service implementation.
///
/// # Example
///
/// ```ignore
/// use toolmetry_runtime::{RuntimeBuilder, transports::mcp::McpService};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = RuntimeBuilder::new().build_local().await?;
/// let http_service = McpService::from_runtime(runtime).streamable_http_service();
/// let router = axum::Router::new().nest_service("/mcp", http_service);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct McpService {
    runtime: LocalRuntime,
    info: ServerInfo,
}

impl McpService {
    /// Create a new MCP service from an existing runtime.
    ///
    /// Uses a default [`ServerInfo`] with tools capability enabled.
    #[must_use]
    pub fn from_runtime(runtime: LocalRuntime) -> Self {
        Self::with_info(runtime, default_server_info())
    }

    /// Create a new MCP service with custom server info.
    #[must_use]
    pub fn with_info(runtime: LocalRuntime, info: ServerInfo) -> Self {
        Self { runtime, info }
    }

    #[must_use]
    pub fn runtime(&self) -> &LocalRuntime {
        &self.runtime
    }

    #[must_use]
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Creates a streamable HTTP service with default configuration.
    ///
    /// Returns an Axum-compatible service that can be mounted in a router.
    #[must_use]
    pub fn streamable_http_service(&self) -> StreamableHttpService<Self, LocalSessionManager> {
        self.streamable_http_service_with_config(StreamableHttpServerConfig::default())
    }

    /// Creates a streamable HTTP service with custom configuration.
    #[must_use]
    pub fn streamable_http_service_with_config(
        &self,
        config: StreamableHttpServerConfig,
    ) -> StreamableHttpService<Self, LocalSessionManager> {
        let service = self.clone();
        StreamableHttpService::new(move || Ok(service.clone()), Arc::default(), config)
    }
}

impl ServerHandler for McpService {
    fn get_info(&self) -> ServerInfo {
        self.info.clone()
    }

    /// Lists the tools admitted at startup.
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let tools = self
            .runtime
            .list_tools()
            .into_iter()
            .map(definition_to_mcp)
            .collect();
        async move { Ok(ListToolsResult::with_all_items(tools)) }
    }

    /// Calls a tool by name through the instrumented runtime.
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        let runtime = self.runtime.clone();
        async move {
            let metadata = CallMetadata {
                request_id: context.id.to_string(),
                session_id: extract_session_id_from_extensions(&context.extensions)
                    .unwrap_or_default(),
            };

            match runtime
                .call_tool(&request.name, request.arguments, metadata)
                .await
            {
                Ok(output) => Ok(output_to_result(output)),
                Err(CallError::Tool(error)) => {
                    Ok(CallToolResult::error(vec![Content::text(error.to_string())]))
                }
                Err(CallError::NotFound(name)) => Err(ErrorData::resource_not_found(
                    format!("tool not found: {name}"),
                    None,
                )),
            }
        }
    }
}

/// Creates the default server info with tools capability enabled.
fn default_server_info() -> ServerInfo {
    ServerInfo {
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        ..Default::default()
    }
}

/// Objects become structured content; any other JSON value is returned as
/// text, strings without their quotes.
fn output_to_result(output: Value) -> CallToolResult {
    match output {
        value @ Value::Object(_) => CallToolResult::structured(value),
        Value::String(text) => CallToolResult::success(vec![Content::text(text)]),
        other => CallToolResult::success(vec![Content::text(other.to_string())]),
    }
}

fn definition_to_mcp(definition: &ToolDefinition) -> Tool {
    Tool {
        name: Cow::Owned(definition.name.clone()),
        title: definition.title.clone(),
        description: non_empty_cow(&definition.description),
        input_schema: Arc::new(definition.input_schema.clone()),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

fn non_empty_cow(value: &str) -> Option<Cow<'static, str>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Cow::Owned(trimmed.to_string()))
    }
}

/// Extracts the session ID from HTTP request extensions.
///
/// Looks for the `Mcp-Session-Id` header in the request parts stored in the
/// extensions. Absent for stdio and stateless HTTP.
fn extract_session_id_from_extensions(extensions: &Extensions) -> Option<String> {
    let parts = extensions.get::<http::request::Parts>()?;
    parts
        .headers
        .get(HEADER_SESSION_ID)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use rmcp::{service::ServiceExt, transport::StreamableHttpClientTransport};
    use serde_json::json;
    use tokio::sync::oneshot;
    use toolmetry_core::{
        JsonObject, ToolError, ToolGate,
        testing::{RecordedEvent, RecordingTracker},
    };

    use super::*;
    use crate::RuntimeBuilder;

    #[test]
    fn test_extract_session_id_from_extensions() {
        let request = http::Request::builder()
            .header(HEADER_SESSION_ID, "session-123")
            .body(())
            .expect("request should build");
        let (parts, _body) = request.into_parts();

        let mut extensions = Extensions::new();
        extensions.insert(parts);

        let session_id =
            extract_session_id_from_extensions(&extensions).expect("session id should exist");
        assert_eq!(session_id, "session-123");
    }

    #[test]
    fn test_extract_session_id_from_extensions_missing_header() {
        let request = http::Request::builder()
            .body(())
            .expect("request should build");
        let (parts, _body) = request.into_parts();

        let mut extensions = Extensions::new();
        extensions.insert(parts);

        assert!(extract_session_id_from_extensions(&extensions).is_none());
    }

    #[test]
    fn test_definition_to_mcp_copies_metadata() {
        let definition = ToolDefinition::new("getInventory")
            .with_title("Get inventory")
            .with_description("  Lists stock levels.  ");

        let tool = definition_to_mcp(&definition);

        assert_eq!(tool.name, "getInventory");
        assert_eq!(tool.title.as_deref(), Some("Get inventory"));
        assert_eq!(tool.description.as_deref(), Some("Lists stock levels."));
        assert_eq!(tool.input_schema.get("type"), Some(&json!("object")));
    }

    #[test]
    fn test_empty_description_is_omitted() {
        let tool = definition_to_mcp(&ToolDefinition::new("ping"));
        assert!(tool.description.is_none());
    }

    #[test]
    fn test_output_to_result() {
        let structured = output_to_result(json!({ "qty": 4 }));
        assert_eq!(structured.structured_content, Some(json!({ "qty": 4 })));

        let text = output_to_result(json!("pong"));
        assert!(text.structured_content.is_none());
        assert_eq!(text.content[0].as_text().map(|t| t.text.as_str()), Some("pong"));

        let number = output_to_result(json!(42));
        assert_eq!(number.content[0].as_text().map(|t| t.text.as_str()), Some("42"));
    }

    async fn inventory(_args: JsonObject) -> Result<Value, ToolError> {
        Ok(json!({ "items": [{ "sku": "A1", "qty": 4 }] }))
    }

    async fn product(_args: JsonObject) -> Result<Value, ToolError> {
        Err(ToolError::not_found("not found"))
    }

    async fn adjust(_args: JsonObject) -> Result<Value, ToolError> {
        Ok(json!({ "adjusted": true }))
    }

    fn json_object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => JsonObject::default(),
        }
    }

    #[tokio::test]
    async fn test_mcp_end_to_end_hides_gated_tools_and_reports_calls() -> Result<()> {
        let tracker = Arc::new(RecordingTracker::new().with_flag("inventory-write-tools", false));
        let runtime = RuntimeBuilder::new()
            .with_tracker(tracker.clone())
            .with_tool(ToolDefinition::new("getInventory"), inventory)
            .with_tool(ToolDefinition::new("getProduct"), product)
            .with_tool(
                ToolDefinition::new("adjustStock")
                    .with_gate(ToolGate::flag("inventory-write-tools")),
                adjust,
            )
            .build_local()
            .await?;

        let service = McpService::from_runtime(runtime).streamable_http_service();
        let router = axum::Router::new().nest_service("/mcp", service);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        let uri = format!("http://{addr}/mcp");
        let client = ().serve(StreamableHttpClientTransport::from_uri(uri)).await?;

        let tools = client.list_all_tools().await?;
        let mut names: Vec<_> = tools.iter().map(|tool| tool.name.as_ref()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["getInventory", "getProduct"]);

        let inventory_result = client
            .call_tool(CallToolRequestParam {
                name: "getInventory".into(),
                arguments: None,
            })
            .await?;
        let structured = inventory_result
            .structured_content
            .expect("inventory should return structured content");
        assert_eq!(structured["items"][0]["sku"], "A1");

        let product_result = client
            .call_tool(CallToolRequestParam {
                name: "getProduct".into(),
                arguments: Some(json_object(json!({ "sku": "ZZ-404" }))),
            })
            .await?;
        assert_eq!(product_result.is_error, Some(true));

        let gated = client
            .call_tool(CallToolRequestParam {
                name: "adjustStock".into(),
                arguments: None,
            })
            .await;
        assert!(gated.is_err(), "gated-off tool must not be callable");

        client.cancel().await?;
        let _ = shutdown_tx.send(());
        let _ = server.await;

        let events = tracker.events();
        let names: Vec<_> = events.iter().map(RecordedEvent::operation_name).collect();
        assert_eq!(names, vec!["getInventory", "getProduct"]);
        assert!(matches!(&events[0], RecordedEvent::Success(_)));
        assert!(matches!(&events[1], RecordedEvent::Error(_)));

        Ok(())
    }
}
