//! Task state machine
//!
//! ```text
//! Created ──► Running ──┬──► Completed
//!    │                  ├──► Failed
//!    │                  ├──► TimedOut
//!    └──────────────────┴──► Cancelled
//! ```

use crate::error::TaskError;
use serde::{Deserialize, Serialize};

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Handle exists, manager has not spawned a worker yet
    Created,

    /// Worker spawned, outcome not yet observed
    Running,

    /// Target returned a value
    Completed,

    /// Target failed, or the outcome could not be delivered
    Failed,

    /// Deadline elapsed before the worker produced anything
    TimedOut,

    /// Cancellation was observed before a real result
    Cancelled,
}

impl TaskState {
    /// Terminal state for a finalized outcome
    pub(crate) fn from_outcome<T>(outcome: &Result<T, TaskError>) -> Self {
        match outcome {
            Ok(_) => TaskState::Completed,
            Err(TaskError::Timeout { .. }) => TaskState::TimedOut,
            Err(TaskError::Cancelled) => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        }
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::TimedOut | TaskState::Cancelled
        )
    }

    /// Check if task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    /// Check if task completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Completed)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Created => "Created",
            TaskState::Running => "Running",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
            TaskState::TimedOut => "TimedOut",
            TaskState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
