//! PostHog backend for the toolmetry tracking contract.
//!
//! Each report becomes one `capture` request carrying the tracker's identity
//! as `distinct_id`. Flag lookups use the `decide` endpoint.
//!
//! Reporting never waits on the network: each request runs on its own
//! background task, tracked so that [`Tracker::shutdown`] can wait for the
//! outstanding ones up to the flush timeout. A failed delivery is logged and
//! dropped, never retried.
//!
//! # Events
//!
//! | event           | properties                                                                 |
//! |-----------------|----------------------------------------------------------------------------|
//! | `tool_executed` | `tool_name`, `duration_ms`, `success: true`, extra                          |
//! | `tool_error`    | `tool_name`, `duration_ms`, `success: false`, `exception_type`, `exception_message`, `exception_stack`?, `arguments`?, extra |
//!
//! Extra properties never replace the fixed ones.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolmetry_core::{
    AnalyticsConfig, DEFAULT_POSTHOG_HOST, ErrorReport, Identity, InvocationOutcome, JsonObject,
    Properties, Tracker, TrackingError,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const TOOL_EXECUTED_EVENT: &str = "tool_executed";
pub const TOOL_ERROR_EVENT: &str = "tool_error";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection settings for [`PostHogTracker`].
#[derive(Debug, Clone)]
pub struct PostHogConfig {
    pub api_key: String,
    pub host: String,
    /// Bound on every HTTP request the tracker makes.
    pub request_timeout: Duration,
    /// How long shutdown waits for reports still in flight.
    pub flush_timeout: Duration,
    /// Correlation id to use; a fresh one is generated when absent.
    pub identity: Option<Identity>,
}

impl PostHogConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: DEFAULT_POSTHOG_HOST.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            identity: None,
        }
    }

    /// Builds connection settings from resolved analytics config.
    ///
    /// Returns `None` when analytics is not configured.
    pub fn from_analytics(config: &AnalyticsConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let api_key = config.api_key.clone()?;
        Some(Self::new(api_key).with_host(config.host.clone()))
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// [`Tracker`] that delivers to a PostHog project.
#[derive(Debug)]
pub struct PostHogTracker {
    http: reqwest::Client,
    api_key: String,
    host: String,
    identity: Identity,
    flush_timeout: Duration,
    closed: AtomicBool,
    /// Capture requests not yet known to have finished.
    inflight: Mutex<JoinSet<()>>,
}

impl PostHogTracker {
    /// Creates a tracker. No request is made until the first report or flag
    /// query.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::Config`] if the key or host is empty and
    /// [`TrackingError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: PostHogConfig) -> Result<Self, TrackingError> {
        let api_key = config.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(TrackingError::Config("api key must not be empty".into()));
        }
        let host = normalize_host(&config.host)?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TrackingError::Transport(e.to_string()))?;

        let identity = config.identity.unwrap_or_else(Identity::generate);
        debug!(host = %host, identity = %identity, "posthog tracker ready");

        Ok(Self {
            http,
            api_key,
            host,
            identity,
            flush_timeout: config.flush_timeout,
            closed: AtomicBool::new(false),
            inflight: Mutex::new(JoinSet::new()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of capture requests still running.
    pub fn pending_reports(&self) -> usize {
        let mut inflight = self.inflight();
        while inflight.try_join_next().is_some() {}
        inflight.len()
    }

    fn inflight(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts delivery of one event and returns without waiting for it.
    fn dispatch(&self, event: &'static str, tool: &str, properties: JsonObject) {
        let mut inflight = self.inflight();
        // Checked under the lock so shutdown cannot miss a request.
        if self.is_closed() {
            debug!(event, tool, "tracker closed, dropping report");
            return;
        }

        let request = self
            .http
            .post(format!("{}/capture/", self.host))
            .json(&CaptureRequest {
                api_key: &self.api_key,
                event,
                distinct_id: self.identity.as_str(),
                properties,
            });
        let tool = tool.to_string();

        while inflight.try_join_next().is_some() {}
        inflight.spawn(async move {
            if let Err(error) = send_capture(request).await {
                warn!(event, tool = %tool, error = %error, "failed to deliver analytics event");
            }
        });
    }
}

async fn send_capture(request: reqwest::RequestBuilder) -> Result<(), TrackingError> {
    let response = request
        .send()
        .await
        .map_err(|e| TrackingError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(TrackingError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Tracker for PostHogTracker {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn report_success(&self, outcome: &InvocationOutcome) {
        let properties = success_properties(outcome);
        self.dispatch(TOOL_EXECUTED_EVENT, &outcome.operation_name, properties);
    }

    async fn report_error(&self, report: &ErrorReport) {
        let properties = error_properties(report);
        self.dispatch(TOOL_ERROR_EVENT, &report.operation_name, properties);
    }

    async fn query_flag(&self, flag: &str) -> Result<bool, TrackingError> {
        if self.is_closed() {
            return Err(TrackingError::Closed);
        }

        let body = DecideRequest {
            api_key: &self.api_key,
            distinct_id: self.identity.as_str(),
        };

        let response = self
            .http
            .post(format!("{}/decide/", self.host))
            .query(&[("v", "3")])
            .json(&body)
            .send()
            .await
            .map_err(|e| TrackingError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decide: DecideResponse = response
            .json()
            .await
            .map_err(|e| TrackingError::Decode(e.to_string()))?;

        let enabled = decide
            .feature_flags
            .get(flag)
            .is_some_and(flag_value_enabled);
        debug!(flag, enabled, "flag resolved");
        Ok(enabled)
    }

    async fn shutdown(&self) {
        let mut pending = {
            let mut inflight = self.inflight();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *inflight)
        };

        let outstanding = pending.len();
        let flush = async {
            while pending.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.flush_timeout, flush).await.is_err() {
            warn!(
                remaining = pending.len(),
                timeout_ms = self.flush_timeout.as_millis(),
                "analytics flush timed out, dropping pending events"
            );
            pending.abort_all();
        }

        info!(identity = %self.identity, outstanding, "analytics tracker shut down");
    }
}

/// `true` and non-empty multivariate keys enable; everything else does not.
fn flag_value_enabled(value: &Value) -> bool {
    match value {
        Value::Bool(enabled) => *enabled,
        Value::String(variant) => !variant.is_empty(),
        _ => false,
    }
}

fn normalize_host(host: &str) -> Result<String, TrackingError> {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TrackingError::Config("host must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn with_extra(extra: &Properties) -> JsonObject {
    let mut properties = JsonObject::new();
    for (key, value) in extra {
        if let Ok(value) = serde_json::to_value(value) {
            properties.insert(key.clone(), value);
        }
    }
    properties
}

fn success_properties(outcome: &InvocationOutcome) -> JsonObject {
    let mut properties = with_extra(&outcome.extra);
    properties.insert("tool_name".into(), outcome.operation_name.clone().into());
    properties.insert("duration_ms".into(), outcome.duration_ms.into());
    properties.insert("success".into(), true.into());
    properties
}

fn error_properties(report: &ErrorReport) -> JsonObject {
    let mut properties = with_extra(&report.extra);
    properties.insert("tool_name".into(), report.operation_name.clone().into());
    properties.insert("duration_ms".into(), report.duration_ms.into());
    properties.insert("success".into(), false.into());
    properties.insert("exception_type".into(), report.error.kind.clone().into());
    properties.insert(
        "exception_message".into(),
        report.error.message.clone().into(),
    );
    if let Some(stack) = &report.error.stack {
        properties.insert("exception_stack".into(), stack.clone().into());
    }
    if let Some(arguments) = &report.arguments {
        properties.insert("arguments".into(), Value::Object(arguments.clone()));
    }
    properties
}

#[derive(Debug, Serialize)]
struct CaptureRequest<'a> {
    api_key: &'a str,
    event: &'a str,
    distinct_id: &'a str,
    properties: JsonObject,
}

#[derive(Debug, Serialize)]
struct DecideRequest<'a> {
    api_key: &'a str,
    distinct_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecideResponse {
    #[serde(rename = "featureFlags", default)]
    feature_flags: HashMap<String, Value>,
}
