//! Tool registry backing the serving surface.
//!
//! The registry is where admitted tools land at startup. It has two phases,
//! like any registry shared with a server:
//!
//! - **Registration phase**: [`ToolRegistry::register`] takes `&mut self`.
//!   Only tools that passed the capability gate are registered here.
//! - **Serving phase**: once wrapped in [`Arc`], lookups ([`get`], [`list`])
//!   and the in-flight counter are safe to use concurrently. Nothing is
//!   registered or removed after this point.
//!
//! [`get`]: ToolRegistry::get
//! [`list`]: ToolRegistry::list

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{JsonObject, gate::ToolGate};

/// Errors raised while registering tools.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Each tool name can be registered once.
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),
}

/// Failure returned by a tool handler.
///
/// This is the error a tool caller sees; the instrumentation layer reports
/// it and passes it through unchanged.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The arguments did not match the tool's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The thing the tool was asked about does not exist.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ToolError {
    pub fn invalid_arguments(message: impl fmt::Display) -> Self {
        Self::InvalidArguments(message.to_string())
    }

    pub fn not_found(message: impl fmt::Display) -> Self {
        Self::NotFound(message.to_string())
    }

    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{message}"))
    }
}

/// Future returned by [`ToolHandler::call`].
pub type ToolFuture<'a> = BoxFuture<'a, Result<Value, ToolError>>;

/// Business logic behind a tool.
///
/// Implemented for any `Fn(JsonObject) -> impl Future<Output = Result<Value,
/// ToolError>>`; use [`typed`] for handlers with typed input and output.
pub trait ToolHandler: Send + Sync {
    fn call(&self, arguments: JsonObject) -> ToolFuture<'_>;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(JsonObject) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    fn call(&self, arguments: JsonObject) -> ToolFuture<'_> {
        Box::pin(self(arguments))
    }
}

/// Adapts a handler taking a deserialized input and returning a
/// serializable output.
///
/// Arguments that fail to deserialize produce [`ToolError::InvalidArguments`]
/// without running the handler.
pub fn typed<I, O, F, Fut>(handler: F) -> TypedHandler<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
{
    TypedHandler {
        handler,
        _marker: PhantomData,
    }
}

/// Handler produced by [`typed`].
pub struct TypedHandler<I, O, F> {
    handler: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> ToolHandler for TypedHandler<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
{
    fn call(&self, arguments: JsonObject) -> ToolFuture<'_> {
        let input = serde_json::from_value::<I>(Value::Object(arguments));
        let future = input.map(|input| (self.handler)(input));
        Box::pin(async move {
            let output = future.map_err(ToolError::invalid_arguments)?.await?;
            serde_json::to_value(output)
                .map_err(|e| ToolError::failed(format!("failed to serialize output: {e}")))
        })
    }
}

/// Static description of a tool, as listed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    /// JSON Schema of the tool's arguments object.
    pub input_schema: JsonObject,
    pub gate: ToolGate,
}

impl ToolDefinition {
    /// Creates an ungated definition accepting any object.
    pub fn new(name: impl Into<String>) -> Self {
        let mut input_schema = JsonObject::new();
        input_schema.insert("type".to_string(), Value::String("object".to_string()));
        Self {
            name: name.into(),
            title: None,
            description: String::new(),
            input_schema,
            gate: ToolGate::Always,
        }
    }

    /// Creates a definition whose input schema is derived from `I`.
    pub fn for_input<I: JsonSchema>(name: impl Into<String>) -> Self {
        let definition = Self::new(name);
        match serde_json::to_value(schemars::schema_for!(I)) {
            Ok(Value::Object(schema)) => definition.with_input_schema(schema),
            _ => definition,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonObject) -> Self {
        self.input_schema = schema;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: ToolGate) -> Self {
        self.gate = gate;
        self
    }
}

/// A registered tool: its definition and the handler that runs it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Runs the handler. No instrumentation happens here.
    pub fn call(&self, arguments: JsonObject) -> ToolFuture<'_> {
        self.handler.call(arguments)
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Tools exposed by a running server.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<RegisteredTool>>,
    inflight: AtomicU64,
}

/// RAII guard returned by [`ToolRegistry::start_request_guard`].
pub struct InflightRequestGuard<'a> {
    registry: &'a ToolRegistry,
}

impl Drop for InflightRequestGuard<'_> {
    fn drop(&mut self) {
        self.registry.end_request();
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its definition's name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if a tool with the same name
    /// is already registered.
    #[instrument(skip(self, definition, handler), fields(tool = %definition.name))]
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }

        debug!(gate = %definition.gate, "registered tool");
        self.tools.insert(
            definition.name.clone(),
            Arc::new(RegisteredTool {
                definition,
                handler,
            }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns every registered definition, ordered by name.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        let mut definitions: Vec<_> = self.tools.values().map(|tool| &tool.definition).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn start_request(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the in-flight counter until the guard is dropped.
    pub fn start_request_guard(&self) -> InflightRequestGuard<'_> {
        self.start_request();
        InflightRequestGuard { registry: self }
    }

    /// Saturates at zero.
    pub fn end_request(&self) {
        let _ = self
            .inflight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(1))
            });
    }

    #[must_use]
    pub fn inflight_count(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Waits until no tool call is in flight, polling every 10ms.
    pub async fn drain(&self) {
        while self.inflight_count() > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
    }
}
