//! Thread priority hints.
//!
//! Raising a thread into a real-time scheduling class needs platform
//! privileges. The clock threads only *ask* through [`PriorityHint`]; the
//! default implementation records the request and does nothing else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested scheduling class for a background thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPriority {
    /// Real-time class (clock threads).
    #[default]
    #[serde(alias = "real_time")]
    Realtime,
    /// Above normal.
    High,
    /// Leave the thread alone.
    Normal,
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Realtime => "realtime",
            Self::High => "high",
            Self::Normal => "normal",
        };
        f.write_str(s)
    }
}

/// Applies a scheduling request to the calling thread.
pub trait PriorityHint: Send + Sync {
    /// Called once from the thread being configured.
    fn apply(&self, thread_name: &str, priority: ThreadPriority);
}

/// Ignores every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPriorityHint;

impl PriorityHint for NoopPriorityHint {
    fn apply(&self, thread_name: &str, priority: ThreadPriority) {
        tracing::debug!(thread = thread_name, %priority, "priority hint ignored");
    }
}

/// Logs every request at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingPriorityHint;

impl PriorityHint for LoggingPriorityHint {
    fn apply(&self, thread_name: &str, priority: ThreadPriority) {
        tracing::info!(thread = thread_name, %priority, "thread priority requested");
    }
}
