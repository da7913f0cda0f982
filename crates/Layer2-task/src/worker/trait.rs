//! Spawner and worker handle traits

use crate::channel::Channel;
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Type-erased target invocation, run once inside the isolation unit
pub type Job = Box<dyn FnOnce() -> WorkerExit + Send + 'static>;

/// What the entry point hands back to the isolation unit
#[derive(Debug)]
pub enum WorkerExit {
    /// Encoded envelope; write it to the channel
    Frame(Vec<u8>),
    /// OS/IO failure; exit without writing
    Fault(std::io::Error),
}

/// Spawner trait - implement to add new isolation backends
pub trait Spawner: Send + Sync {
    /// Start `job` in a new isolation unit that writes its frame to `channel`.
    fn spawn(
        &self,
        task_id: TaskId,
        job: Job,
        channel: Arc<Channel>,
    ) -> std::io::Result<Box<dyn WorkerHandle>>;

    /// Get spawner name
    fn name(&self) -> &'static str;
}

/// Handle to a running worker, owned by exactly one manager
pub trait WorkerHandle: Send {
    /// Human-readable identity for logs
    fn label(&self) -> String;

    /// OS process id, if the worker is a process
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Stop the worker. Must be safe to call on a worker that already exited.
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Wait for the worker to go away. Blocking.
    fn join(&mut self) -> std::io::Result<WorkerStatus>;
}

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    /// Exited on its own with this code
    Exited(i32),
    /// Killed by this signal
    Signaled(i32),
    /// Could not be stopped and was left to finish in the background
    Detached,
}

impl WorkerStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            WorkerStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

/// Teardown record kept on the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub label: String,
    pub pid: Option<u32>,
    /// `None` when the worker could not be reaped in time
    pub status: Option<WorkerStatus>,
}
