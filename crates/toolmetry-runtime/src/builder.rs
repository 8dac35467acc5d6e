//! Builder for constructing gated runtime instances.
//!
//! This module provides [`RuntimeBuilder`], a fluent builder API that
//! collects candidate tools together with the tracker and settings the
//! runtime will use. Building the runtime:
//!
//! - **Gating**: resolves each candidate's [`ToolGate`](toolmetry_core::ToolGate)
//!   against the tracker, bounded by the flag timeout
//! - **Registration**: registers only admitted tools
//! - **Instrumentation**: wires the tracker into every future call
//!
//! Gate decisions are taken once. Flipping a flag afterwards changes nothing
//! until a new runtime is built.
//!
//! # Usage
//!
//! ```ignore
//! use std::{sync::Arc, time::Duration};
//!
//! use toolmetry_runtime::RuntimeBuilder;
//!
//! # async fn example(tracker: Arc<dyn toolmetry_core::Tracker>) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = RuntimeBuilder::new()
//!     .with_tracker(tracker)
//!     .with_flag_timeout(Duration::from_secs(1))
//!     .build_local()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc, time::Duration};

use futures::future::join_all;
use toolmetry_core::{
    CapabilityGate, DEFAULT_FLAG_TIMEOUT, FlagResolution, GateDecision, Instrumenter, NoopTracker,
    RegistryError, ToolDefinition, ToolHandler, ToolRegistry, Tracker, UnresolvedReason,
};
use tracing::{debug, info};

use crate::runtime::LocalRuntime;

/// Errors that can occur during runtime construction.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeBuildError {
    /// Two admitted candidates share a name.
    #[error("failed to register tool: {0}")]
    Registry(#[from] RegistryError),
}

struct Candidate {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Fluent builder for constructing a [`LocalRuntime`].
///
/// # Default Configuration
///
/// - Tracker: [`NoopTracker`], so gated tools are omitted
/// - Anonymization: on
/// - Flag timeout: [`DEFAULT_FLAG_TIMEOUT`]
/// - Tools: none
#[derive(Clone)]
pub struct RuntimeBuilder {
    tracker: Arc<dyn Tracker>,
    anonymize: bool,
    flag_timeout: Duration,
    candidates: Vec<Arc<Candidate>>,
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .candidates
            .iter()
            .map(|candidate| candidate.definition.name.as_str())
            .collect();
        f.debug_struct("RuntimeBuilder")
            .field("tracker", &self.tracker)
            .field("anonymize", &self.anonymize)
            .field("flag_timeout", &self.flag_timeout)
            .field("candidates", &names)
            .finish()
    }
}

impl RuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(NoopTracker::new()),
            anonymize: true,
            flag_timeout: DEFAULT_FLAG_TIMEOUT,
            candidates: Vec::new(),
        }
    }

    /// Sets the tracker used for gating and for every call's report.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Sets whether argument values are redacted in error reports.
    #[must_use]
    pub fn with_anonymize(mut self, anonymize: bool) -> Self {
        self.anonymize = anonymize;
        self
    }

    /// Bounds each startup flag query.
    #[must_use]
    pub fn with_flag_timeout(mut self, timeout: Duration) -> Self {
        self.flag_timeout = timeout;
        self
    }

    /// Adds a candidate tool. Whether it is exposed is decided by
    /// [`build_local`](Self::build_local).
    #[must_use]
    pub fn with_tool(
        mut self,
        definition: ToolDefinition,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.candidates.push(Arc::new(Candidate {
            definition,
            handler: Arc::new(handler),
        }));
        self
    }

    /// Runs the capability gate and builds a [`LocalRuntime`] holding the
    /// admitted tools.
    ///
    /// Flag queries for all gated candidates run concurrently, each bounded
    /// by the flag timeout, so startup waits at most one timeout. Decisions
    /// and registration follow the order the candidates were added.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeBuildError::Registry`] if two admitted tools share a
    /// name.
    pub async fn build_local(self) -> Result<LocalRuntime, RuntimeBuildError> {
        build_local_runtime(self).await
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_local_runtime(builder: RuntimeBuilder) -> Result<LocalRuntime, RuntimeBuildError> {
    let gate = CapabilityGate::new(Arc::clone(&builder.tracker)).with_timeout(builder.flag_timeout);

    let decisions = join_all(
        builder
            .candidates
            .iter()
            .map(|candidate| gate.decide(&candidate.definition)),
    )
    .await;

    let hidden = hidden_without_backend(&decisions);
    if !hidden.is_empty() {
        info!(
            tools = ?hidden,
            "No analytics backend configured, flag-gated tools are hidden"
        );
    }

    let mut registry = ToolRegistry::new();
    for (candidate, decision) in builder.candidates.iter().zip(&decisions) {
        if decision.admitted {
            registry.register(candidate.definition.clone(), Arc::clone(&candidate.handler))?;
        } else {
            debug!(tool = %decision.tool, gate = %decision.gate, "tool omitted");
        }
    }

    let registered: Vec<_> = registry
        .list()
        .into_iter()
        .map(|definition| definition.name.clone())
        .collect();
    let omitted: Vec<_> = decisions
        .iter()
        .filter(|decision| !decision.admitted)
        .map(|decision| decision.tool.clone())
        .collect();
    info!(
        registered = ?registered,
        omitted = ?omitted,
        analytics = builder.tracker.is_enabled(),
        "Tool registry initialized"
    );

    let instrumenter = Instrumenter::new(builder.tracker).with_anonymize(builder.anonymize);
    Ok(LocalRuntime::new(Arc::new(registry), instrumenter).with_decisions(decisions))
}

/// Tools omitted only because no analytics backend could be asked.
fn hidden_without_backend(decisions: &[GateDecision]) -> Vec<&str> {
    decisions
        .iter()
        .filter(|decision| {
            matches!(
                decision.resolution,
                Some(FlagResolution::Unresolved(UnresolvedReason::NoBackend))
            )
        })
        .map(|decision| decision.tool.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use toolmetry_core::{
        JsonObject, ToolError, ToolGate,
        testing::{RecordedEvent, RecordingTracker},
    };

    use super::*;
    use crate::runtime::{CallError, CallMetadata};

    const WRITE_FLAG: &str = "inventory-write-tools";

    async fn ok_handler(_args: JsonObject) -> Result<Value, ToolError> {
        Ok(json!({ "ok": true }))
    }

    fn inventory_builder(tracker: Arc<RecordingTracker>) -> RuntimeBuilder {
        RuntimeBuilder::new()
            .with_tracker(tracker)
            .with_tool(ToolDefinition::new("getInventory"), ok_handler)
            .with_tool(
                ToolDefinition::new("adjustStock").with_gate(ToolGate::flag(WRITE_FLAG)),
                ok_handler,
            )
    }

    fn names(runtime: &LocalRuntime) -> Vec<&str> {
        runtime
            .list_tools()
            .into_iter()
            .map(|definition| definition.name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_enabled_flag_exposes_gated_tool() {
        let tracker = Arc::new(RecordingTracker::new().with_flag(WRITE_FLAG, true));

        let runtime = inventory_builder(tracker).build_local().await.unwrap();

        assert_eq!(names(&runtime), vec!["adjustStock", "getInventory"]);
    }

    #[tokio::test]
    async fn test_disabled_flag_omits_gated_tool() {
        let tracker = Arc::new(RecordingTracker::new().with_flag(WRITE_FLAG, false));

        let runtime = inventory_builder(tracker).build_local().await.unwrap();

        assert_eq!(names(&runtime), vec!["getInventory"]);
        let decision = &runtime.gate_decisions()[1];
        assert_eq!(decision.tool, "adjustStock");
        assert_eq!(decision.resolution, Some(FlagResolution::Disabled));
    }

    #[tokio::test]
    async fn test_default_builder_omits_gated_tools() {
        let runtime = RuntimeBuilder::new()
            .with_tool(ToolDefinition::new("getInventory"), ok_handler)
            .with_tool(
                ToolDefinition::new("adjustStock").with_gate(ToolGate::flag(WRITE_FLAG)),
                ok_handler,
            )
            .build_local()
            .await
            .unwrap();

        assert_eq!(names(&runtime), vec!["getInventory"]);
        assert_eq!(
            runtime.gate_decisions()[1].resolution,
            Some(FlagResolution::Unresolved(UnresolvedReason::NoBackend))
        );
        assert_eq!(
            hidden_without_backend(runtime.gate_decisions()),
            vec!["adjustStock"]
        );
    }

    #[tokio::test]
    async fn test_explicitly_disabled_flag_is_not_a_missing_backend() {
        let tracker = Arc::new(RecordingTracker::new().with_flag(WRITE_FLAG, false));

        let runtime = inventory_builder(tracker).build_local().await.unwrap();

        assert!(hidden_without_backend(runtime.gate_decisions()).is_empty());
    }

    #[tokio::test]
    async fn test_slow_flag_times_out_and_omits_tool() {
        let tracker = Arc::new(
            RecordingTracker::new()
                .with_flag("x", true)
                .with_flag_delay(Duration::from_secs(5)),
        );

        let started = std::time::Instant::now();
        let runtime = RuntimeBuilder::new()
            .with_tracker(tracker)
            .with_flag_timeout(Duration::from_millis(50))
            .with_tool(
                ToolDefinition::new("experimental").with_gate(ToolGate::flag("x")),
                ok_handler,
            )
            .build_local()
            .await
            .unwrap();

        assert!(runtime.list_tools().is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            runtime.gate_decisions()[0].resolution,
            Some(FlagResolution::Unresolved(UnresolvedReason::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_gated_queries_run_concurrently() {
        let tracker = Arc::new(
            RecordingTracker::new()
                .with_flag("a", true)
                .with_flag("b", true)
                .with_flag("c", true)
                .with_flag_delay(Duration::from_millis(150)),
        );

        let started = std::time::Instant::now();
        let runtime = RuntimeBuilder::new()
            .with_tracker(tracker.clone())
            .with_tool(ToolDefinition::new("a").with_gate(ToolGate::flag("a")), ok_handler)
            .with_tool(ToolDefinition::new("b").with_gate(ToolGate::flag("b")), ok_handler)
            .with_tool(ToolDefinition::new("c").with_gate(ToolGate::flag("c")), ok_handler)
            .build_local()
            .await
            .unwrap();

        assert_eq!(names(&runtime), vec!["a", "b", "c"]);
        assert_eq!(tracker.flag_query_count(), 3);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_flag_flip_after_build_has_no_effect() {
        let tracker = Arc::new(RecordingTracker::new().with_flag(WRITE_FLAG, false));
        let runtime = inventory_builder(tracker.clone()).build_local().await.unwrap();
        let queries_at_startup = tracker.flag_query_count();

        tracker.set_flag(WRITE_FLAG, true);

        assert_eq!(names(&runtime), vec!["getInventory"]);
        let error = runtime
            .call_tool("adjustStock", None, CallMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(error, CallError::NotFound(_)));
        assert_eq!(tracker.flag_query_count(), queries_at_startup);
    }

    #[tokio::test]
    async fn test_duplicate_admitted_names_fail_the_build() {
        let result = RuntimeBuilder::new()
            .with_tool(ToolDefinition::new("getInventory"), ok_handler)
            .with_tool(ToolDefinition::new("getInventory"), ok_handler)
            .build_local()
            .await;

        assert!(matches!(
            result,
            Err(RuntimeBuildError::Registry(RegistryError::DuplicateName(_)))
        ));
    }

    #[tokio::test]
    async fn test_anonymize_setting_reaches_reports() {
        let tracker = Arc::new(RecordingTracker::new());
        let runtime = RuntimeBuilder::new()
            .with_tracker(tracker.clone())
            .with_anonymize(false)
            .with_tool(ToolDefinition::new("getProduct"), |_args: JsonObject| async {
                Err::<Value, _>(ToolError::not_found("not found"))
            })
            .build_local()
            .await
            .unwrap();
        assert!(!runtime.instrumenter().anonymize());
        let mut arguments = JsonObject::new();
        arguments.insert("sku".into(), json!("A1"));

        let _ = runtime
            .call_tool("getProduct", Some(arguments), CallMetadata::default())
            .await;

        let events = tracker.events();
        let RecordedEvent::Error(report) = &events[0] else {
            panic!("expected an error report");
        };
        assert_eq!(report.arguments.as_ref().unwrap()["sku"], "A1");
    }
}
