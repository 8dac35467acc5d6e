//! Backend-agnostic tracking contract.
//!
//! A [`Tracker`] receives one report per instrumented tool invocation and
//! answers boolean flag queries used for startup gating. Delivery is best
//! effort: the report methods return nothing, and implementations log and
//! swallow their own transport failures so that an unreachable analytics
//! backend never changes what a tool caller observes.
//!
//! Running without analytics is a supported configuration. [`NoopTracker`]
//! satisfies the same contract with no side effects and reports itself as
//! disabled, so call sites never branch on whether a backend exists.

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{JsonObject, identity::Identity};

/// Scalar value attached to an event as an extra property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

/// Open extension slot carried by outcomes and error reports.
pub type Properties = BTreeMap<String, PropertyValue>;

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Outcome of a tool invocation that completed successfully.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationOutcome {
    pub operation_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub extra: Properties,
}

/// Kind, message and optional stack of a failed invocation's error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Captures an error value without consuming it.
    ///
    /// The kind is the unqualified type name of `E`, the message its
    /// `Display` output. A multi-line `Debug` rendering (an error chain or a
    /// captured backtrace) is kept as the stack.
    pub fn capture<E>(error: &E) -> Self
    where
        E: fmt::Display + fmt::Debug + ?Sized,
    {
        let message = error.to_string();
        let debug = format!("{error:?}");
        let detail = Self::new(short_type_name::<E>(), message);
        if debug.contains('\n') {
            detail.with_stack(debug)
        } else {
            detail
        }
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Report emitted when a tool invocation fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub operation_name: String,
    pub duration_ms: u64,
    pub error: ErrorDetail,
    /// Tool arguments, already passed through the anonymization policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<JsonObject>,
    pub extra: Properties,
}

/// Failures inside a tracking backend.
///
/// Only [`Tracker::query_flag`] surfaces these; report and shutdown failures
/// are logged by the backend itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackingError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("tracker has been shut down")]
    Closed,

    #[error("invalid tracker configuration: {0}")]
    Config(String),
}

/// Contract every analytics backend satisfies.
///
/// Implementations are shared behind `Arc` by every concurrent invocation,
/// so they must be `Send + Sync` and must tolerate interleaved calls.
#[async_trait]
pub trait Tracker: fmt::Debug + Send + Sync {
    /// Correlation id attached to everything this tracker emits.
    fn identity(&self) -> &Identity;

    /// Whether this tracker delivers anywhere.
    ///
    /// Returns `false` for the no-op tracker; the instrumenter and the gate
    /// use it to skip tracking work entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Records a successful invocation. Best effort.
    async fn report_success(&self, outcome: &InvocationOutcome);

    /// Records a failed invocation. Best effort.
    async fn report_error(&self, report: &ErrorReport);

    /// Looks up a boolean flag for this tracker's identity.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError`] when the backend cannot be reached or
    /// answers with something that is not a flag decision.
    async fn query_flag(&self, flag: &str) -> Result<bool, TrackingError>;

    /// Flushes and releases backend resources. Never fails from the caller's
    /// point of view.
    async fn shutdown(&self);
}

/// Tracker used when no analytics backend is configured.
#[derive(Debug, Clone)]
pub struct NoopTracker {
    identity: Identity,
}

impl NoopTracker {
    pub fn new() -> Self {
        Self {
            identity: Identity::generate(),
        }
    }
}

impl Default for NoopTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracker for NoopTracker {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn report_success(&self, _outcome: &InvocationOutcome) {}

    async fn report_error(&self, _report: &ErrorReport) {}

    async fn query_flag(&self, _flag: &str) -> Result<bool, TrackingError> {
        Ok(false)
    }

    async fn shutdown(&self) {}
}
