//! In-process runtime that executes admitted tools.

use std::sync::Arc;

use serde_json::Value;
use toolmetry_core::{
    GateDecision, Instrumenter, JsonObject, ToolDefinition, ToolError, ToolRegistry, Tracker,
};
use tracing::{error, info, instrument};

/// Metadata associated with a tool call.
#[derive(Debug, Clone, Default)]
pub struct CallMetadata {
    /// Request identifier for tracing.
    pub request_id: String,
    /// Transport session the call arrived on, if any.
    pub session_id: String,
}

/// Errors returned by [`LocalRuntime::call_tool`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
    /// No admitted tool has this name. Gated-off tools land here too.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The tool ran and failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Runtime implementation that executes tools locally.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    registry: Arc<ToolRegistry>,
    instrumenter: Instrumenter,
    decisions: Arc<[GateDecision]>,
}

impl LocalRuntime {
    /// Creates a runtime over an already-populated registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, instrumenter: Instrumenter) -> Self {
        Self {
            registry,
            instrumenter,
            decisions: Arc::from(Vec::new()),
        }
    }

    #[must_use]
    pub(crate) fn with_decisions(mut self, decisions: Vec<GateDecision>) -> Self {
        self.decisions = Arc::from(decisions);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        self.instrumenter.tracker()
    }

    /// Startup gate decisions for every candidate tool, in the order the
    /// candidates were added.
    #[must_use]
    pub fn gate_decisions(&self) -> &[GateDecision] {
        &self.decisions
    }

    /// Lists the exposed tools, ordered by name.
    #[must_use]
    pub fn list_tools(&self) -> Vec<&ToolDefinition> {
        self.registry.list()
    }

    /// Calls a tool through the instrumentation layer.
    ///
    /// Missing arguments are treated as an empty object. An unknown name
    /// fails before anything runs, so no report is produced for it.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NotFound`] for a name that is not registered and
    /// [`CallError::Tool`] with the handler's error, unchanged, when the
    /// tool fails.
    #[instrument(
        skip(self, arguments, metadata),
        fields(request_id = %metadata.request_id, session_id = %metadata.session_id)
    )]
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        metadata: CallMetadata,
    ) -> Result<Value, CallError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| CallError::NotFound(name.to_string()))?;

        info!("Invoking tool");

        let _inflight = self.registry.start_request_guard();
        let arguments = arguments.unwrap_or_default();

        let result = self
            .instrumenter
            .run_with_arguments(name, Some(&arguments), tool.call(arguments.clone()))
            .await;

        result.map_err(|e| {
            error!(error = %e, "Tool invocation failed");
            CallError::Tool(e)
        })
    }

    /// Waits for any in-flight calls to complete.
    pub async fn drain(&self) {
        self.registry.drain().await;
    }

    /// Drains in-flight calls, then shuts the tracker down.
    pub async fn shutdown(&self) {
        self.drain().await;
        self.tracker().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use toolmetry_core::{
        REDACTED, ToolHandler,
        testing::{RecordedEvent, RecordingTracker},
    };

    use super::*;

    fn inventory_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let get_inventory: Arc<dyn ToolHandler> = Arc::new(|_args: JsonObject| async {
            Ok::<_, ToolError>(json!({ "items": [{ "sku": "A1", "qty": 4 }] }))
        });
        let get_product: Arc<dyn ToolHandler> = Arc::new(|_args: JsonObject| async {
            Err::<Value, _>(ToolError::not_found("not found"))
        });
        registry
            .register(ToolDefinition::new("getInventory"), get_inventory)
            .unwrap();
        registry
            .register(ToolDefinition::new("getProduct"), get_product)
            .unwrap();
        registry
    }

    fn runtime_with(tracker: Arc<RecordingTracker>) -> LocalRuntime {
        LocalRuntime::new(Arc::new(inventory_registry()), Instrumenter::new(tracker))
    }

    #[tokio::test]
    async fn test_successful_call_reports_one_success() {
        let tracker = Arc::new(RecordingTracker::new());
        let runtime = runtime_with(tracker.clone());

        let output = runtime
            .call_tool("getInventory", None, CallMetadata::default())
            .await
            .unwrap();

        assert_eq!(output["items"][0]["sku"], "A1");
        let events = tracker.events();
        assert_eq!(events.len(), 1);
        let RecordedEvent::Success(outcome) = &events[0] else {
            panic!("expected a success report");
        };
        assert_eq!(outcome.operation_name, "getInventory");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_failed_call_reports_error_with_redacted_arguments() {
        let tracker = Arc::new(RecordingTracker::new());
        let runtime = runtime_with(tracker.clone());
        let mut arguments = JsonObject::new();
        arguments.insert("sku".into(), json!("ZZ-404"));

        let error = runtime
            .call_tool("getProduct", Some(arguments), CallMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(error, CallError::Tool(ToolError::NotFound(_))));
        assert_eq!(error.to_string(), "not found");

        let events = tracker.events();
        assert_eq!(events.len(), 1);
        let RecordedEvent::Error(report) = &events[0] else {
            panic!("expected an error report");
        };
        assert_eq!(report.operation_name, "getProduct");
        assert_eq!(report.error.kind, "ToolError");
        assert_eq!(report.error.message, "not found");
        assert_eq!(
            report.arguments.as_ref().unwrap().get("sku"),
            Some(&json!(REDACTED))
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_reported() {
        let tracker = Arc::new(RecordingTracker::new());
        let runtime = runtime_with(tracker.clone());

        let error = runtime
            .call_tool("deleteEverything", None, CallMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(error, CallError::NotFound(ref name) if name == "deleteEverything"));
        assert!(tracker.events().is_empty());
    }

    #[tokio::test]
    async fn test_inflight_counter_is_released_after_call() {
        let runtime = runtime_with(Arc::new(RecordingTracker::new()));

        let _ = runtime
            .call_tool("getProduct", None, CallMetadata::default())
            .await;

        assert_eq!(runtime.registry().inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_closes_tracker() {
        let tracker = Arc::new(RecordingTracker::new());
        let runtime = runtime_with(tracker.clone());
        runtime.registry().start_request();

        let drainer = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tracker.shutdown_count(), 0);

        runtime.registry().end_request();
        drainer.await.unwrap();
        assert_eq!(tracker.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_list_tools_is_sorted() {
        let runtime = runtime_with(Arc::new(RecordingTracker::new()));

        let names: Vec<_> = runtime
            .list_tools()
            .into_iter()
            .map(|tool| tool.name.as_str())
            .collect();

        assert_eq!(names, vec!["getInventory", "getProduct"]);
    }
}
