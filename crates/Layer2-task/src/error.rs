//! Task outcome errors
//!
//! Every failure is captured where it happens and delivered as the task's
//! single terminal outcome. The only non-terminal variant is
//! [`TaskError::WaitElapsed`], which reports that the *caller's* wait ran
//! out while the task keeps going.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Target returned an error or panicked inside the worker.
    #[error("{message}")]
    Application {
        message: String,
        /// Error chain and backtrace captured in the worker
        trace: String,
    },

    /// Worker produced nothing before the configured deadline.
    #[error("task timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Cancellation was observed before a real result.
    #[error("task cancelled")]
    Cancelled,

    /// The outcome could not be marshaled across the worker boundary.
    #[error("failed to transport outcome: {message}")]
    Transport { message: String, trace: String },

    /// Worker went away without writing an outcome (OS/IO fault).
    #[error("worker exited without an outcome (exit code {status:?})")]
    WorkerLost { status: Option<i32> },

    /// Isolation unit could not be created.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// `get` gave up waiting; the task itself is not finished.
    #[error("no outcome within {0:?}")]
    WaitElapsed(Duration),
}

impl TaskError {
    /// Trace captured at the origin, if the failure carries one
    pub fn trace(&self) -> Option<&str> {
        match self {
            TaskError::Application { trace, .. } | TaskError::Transport { trace, .. } => {
                Some(trace.as_str())
            }
            _ => None,
        }
    }

    /// Whether this error is a task outcome (as opposed to an elapsed wait)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskError::WaitElapsed(_))
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Application { .. } => "task_application",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Cancelled => "task_cancelled",
            TaskError::Transport { .. } => "task_transport",
            TaskError::WorkerLost { .. } => "task_worker_lost",
            TaskError::Spawn(_) => "task_spawn",
            TaskError::WaitElapsed(_) => "task_wait_elapsed",
        }
    }
}
