//! Per-process correlation identity.
//!
//! Every tracker owns exactly one [`Identity`], generated when the tracker is
//! constructed. All success reports, error reports and flag queries emitted
//! by that tracker carry the same value, which lets an analytics backend
//! group the events of one server run together.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

const IDENTITY_PREFIX: &str = "toolmetry";

static GENERATED: AtomicU64 = AtomicU64::new(0);

/// Correlation key shared by every event emitted during one process run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an explicit identity value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh identity for this process.
    ///
    /// The value combines the wall-clock time in nanoseconds, the process id
    /// and a per-process counter, so two processes started in the same
    /// nanosecond still differ by pid, and two trackers built in the same
    /// process differ by counter.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let sequence = GENERATED.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{IDENTITY_PREFIX}-{nanos:x}-{}-{sequence:x}",
            std::process::id()
        ))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
