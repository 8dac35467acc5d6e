//! In-memory tracker for tests.
//!
//! [`RecordingTracker`] keeps every report it receives and answers flag
//! queries from a map that tests can change at any time, optionally after a
//! delay or with a failure.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    identity::Identity,
    tracking::{ErrorReport, InvocationOutcome, Tracker, TrackingError},
};

/// A report captured by [`RecordingTracker`].
#[derive(Debug, Clone)]
pub enum RecordedEvent {
    Success(InvocationOutcome),
    Error(ErrorReport),
}

impl RecordedEvent {
    pub fn operation_name(&self) -> &str {
        match self {
            Self::Success(outcome) => &outcome.operation_name,
            Self::Error(report) => &report.operation_name,
        }
    }
}

#[derive(Debug, Clone)]
enum FlagAnswer {
    Value(bool),
    Fail(String),
}

#[derive(Debug, Default)]
struct FlagState {
    answers: HashMap<String, FlagAnswer>,
    delay: Option<Duration>,
}

/// Tracker that records everything in memory.
#[derive(Debug)]
pub struct RecordingTracker {
    identity: Identity,
    events: Mutex<Vec<RecordedEvent>>,
    flags: Mutex<FlagState>,
    flag_queries: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self {
            identity: Identity::generate(),
            events: Mutex::new(Vec::new()),
            flags: Mutex::new(FlagState::default()),
            flag_queries: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Sets the answer for `flag`.
    #[must_use]
    pub fn with_flag(self, flag: &str, enabled: bool) -> Self {
        self.set_flag(flag, enabled);
        self
    }

    /// Makes every flag query wait `delay` before answering.
    #[must_use]
    pub fn with_flag_delay(self, delay: Duration) -> Self {
        lock(&self.flags).delay = Some(delay);
        self
    }

    /// Makes queries for `flag` fail with a transport error.
    #[must_use]
    pub fn with_failing_flag(self, flag: &str, message: &str) -> Self {
        lock(&self.flags)
            .answers
            .insert(flag.to_string(), FlagAnswer::Fail(message.to_string()));
        self
    }

    /// Changes the answer for `flag` after construction.
    pub fn set_flag(&self, flag: &str, enabled: bool) {
        lock(&self.flags)
            .answers
            .insert(flag.to_string(), FlagAnswer::Value(enabled));
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    pub fn success_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, RecordedEvent::Success(_)))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, RecordedEvent::Error(_)))
            .count()
    }

    pub fn flag_query_count(&self) -> usize {
        self.flag_queries.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Default for RecordingTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Tracker for RecordingTracker {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn report_success(&self, outcome: &InvocationOutcome) {
        lock(&self.events).push(RecordedEvent::Success(outcome.clone()));
    }

    async fn report_error(&self, report: &ErrorReport) {
        lock(&self.events).push(RecordedEvent::Error(report.clone()));
    }

    async fn query_flag(&self, flag: &str) -> Result<bool, TrackingError> {
        self.flag_queries.fetch_add(1, Ordering::SeqCst);
        let (answer, delay) = {
            let state = lock(&self.flags);
            (state.answers.get(flag).cloned(), state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match answer {
            Some(FlagAnswer::Value(enabled)) => Ok(enabled),
            Some(FlagAnswer::Fail(message)) => Err(TrackingError::Transport(message)),
            None => Ok(false),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
