//! Timing and outcome reporting around asynchronous tool operations.
//!
//! [`instrument`] is the primitive: it awaits an operation exactly once,
//! measures its wall-clock duration on the monotonic clock, and sends
//! exactly one report to the tracker, either a success outcome or an error
//! report. The operation's result is handed back untouched in both cases.
//!
//! [`Instrumenter`] bundles a shared tracker with the anonymization setting
//! and is what the runtime holds for the lifetime of the server.
//!
//! # Ordering
//!
//! The report is sent strictly after the operation settles and awaited
//! before the result is returned, so a caller that observes the result knows
//! the tracker has already been handed the report. If the returned future is
//! dropped before the operation settles, no report is sent.

use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{Instrument as _, debug, debug_span};

use crate::{
    JsonObject,
    anonymize::anonymize_arguments,
    tracking::{ErrorDetail, ErrorReport, InvocationOutcome, NoopTracker, Properties, Tracker},
};

/// Runs `operation` and reports its outcome to `tracker`.
///
/// With `None` the operation is awaited and its result returned with no
/// tracking calls at all.
///
/// # Errors
///
/// Returns exactly the error produced by `operation`.
pub async fn instrument<T, E, F>(
    tracker: Option<&dyn Tracker>,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display + fmt::Debug,
{
    let Some(tracker) = tracker else {
        return operation.await;
    };

    let invocation = Invocation {
        operation_name,
        arguments: None,
        anonymize: true,
        extra: Properties::new(),
    };
    invocation.run(tracker, operation).await
}

/// Shared handle that instruments every tool call of a running server.
#[derive(Debug, Clone)]
pub struct Instrumenter {
    tracker: Arc<dyn Tracker>,
    anonymize: bool,
}

impl Instrumenter {
    /// Creates an instrumenter reporting to `tracker`, anonymizing error
    /// arguments.
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            tracker,
            anonymize: true,
        }
    }

    /// Creates an instrumenter backed by [`NoopTracker`].
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopTracker::new()))
    }

    /// Sets whether argument values are redacted in error reports.
    #[must_use]
    pub fn with_anonymize(mut self, anonymize: bool) -> Self {
        self.anonymize = anonymize;
        self
    }

    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.tracker
    }

    pub fn anonymize(&self) -> bool {
        self.anonymize
    }

    /// Instruments an operation that takes no arguments worth reporting.
    ///
    /// # Errors
    ///
    /// Returns exactly the error produced by `operation`.
    pub async fn run<T, E, F>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display + fmt::Debug,
    {
        self.run_with_extra(operation_name, None, Properties::new(), operation)
            .await
    }

    /// Instruments an operation and attaches its arguments to the error
    /// report, if one is produced.
    ///
    /// # Errors
    ///
    /// Returns exactly the error produced by `operation`.
    pub async fn run_with_arguments<T, E, F>(
        &self,
        operation_name: &str,
        arguments: Option<&JsonObject>,
        operation: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display + fmt::Debug,
    {
        self.run_with_extra(operation_name, arguments, Properties::new(), operation)
            .await
    }

    /// Instruments an operation, attaching `extra` to whichever report is
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns exactly the error produced by `operation`.
    pub async fn run_with_extra<T, E, F>(
        &self,
        operation_name: &str,
        arguments: Option<&JsonObject>,
        extra: Properties,
        operation: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display + fmt::Debug,
    {
        if !self.tracker.is_enabled() {
            return operation.await;
        }

        let invocation = Invocation {
            operation_name,
            arguments,
            anonymize: self.anonymize,
            extra,
        };
        invocation.run(self.tracker.as_ref(), operation).await
    }
}

struct Invocation<'a> {
    operation_name: &'a str,
    arguments: Option<&'a JsonObject>,
    anonymize: bool,
    extra: Properties,
}

impl Invocation<'_> {
    async fn run<T, E, F>(self, tracker: &dyn Tracker, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display + fmt::Debug,
    {
        let span = debug_span!("tool.invoke", tool = %self.operation_name);
        async move {
            let started = Instant::now();
            let result = operation.await;
            let duration_ms = elapsed_millis(started.elapsed());

            match &result {
                Ok(_) => {
                    debug!(duration_ms, "tool succeeded");
                    let outcome = InvocationOutcome {
                        operation_name: self.operation_name.to_string(),
                        duration_ms,
                        success: true,
                        extra: self.extra,
                    };
                    tracker.report_success(&outcome).await;
                }
                Err(error) => {
                    debug!(duration_ms, error = %error, "tool failed");
                    let arguments = self
                        .arguments
                        .map(|arguments| anonymize_arguments(Some(arguments), self.anonymize));
                    let report = ErrorReport {
                        operation_name: self.operation_name.to_string(),
                        duration_ms,
                        error: ErrorDetail::capture(error),
                        arguments,
                        extra: self.extra,
                    };
                    tracker.report_error(&report).await;
                }
            }

            result
        }
        .instrument(span)
        .await
    }
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
