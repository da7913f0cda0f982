//! Thread worker - runs the job on a dedicated OS thread
//!
//! Threads cannot be killed. `terminate` on a thread that is still running
//! detaches it; the job keeps going in the background and whatever it
//! writes later is dropped by the channel.

use super::r#trait::{Job, Spawner, WorkerExit, WorkerHandle, WorkerStatus};
use super::FAULT_EXIT_CODE;
use crate::channel::{Channel, Producer, Signal};
use crate::task::TaskId;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Spawns workers as OS threads
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl ThreadSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(
        &self,
        task_id: TaskId,
        job: Job,
        channel: Arc<Channel>,
    ) -> std::io::Result<Box<dyn WorkerHandle>> {
        let name = format!("isotask-worker-{}", task_id.as_u64());
        let producer = Producer::new(channel);

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            match job() {
                WorkerExit::Frame(frame) => {
                    producer.put(Signal::Frame(frame));
                    0
                }
                WorkerExit::Fault(e) => {
                    debug!("Worker for task {} hit an OS error: {}", task_id, e);
                    FAULT_EXIT_CODE
                }
            }
            // producer dropped here: channel sees the worker side gone
        })?;

        Ok(Box::new(ThreadWorker {
            name,
            handle: Some(handle),
            detached: false,
        }))
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

struct ThreadWorker {
    name: String,
    handle: Option<JoinHandle<i32>>,
    detached: bool,
}

impl WorkerHandle for ThreadWorker {
    fn label(&self) -> String {
        format!("thread {}", self.name)
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        let running = self
            .handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);

        if running {
            debug!("Detaching still-running worker thread {}", self.name);
            self.detached = true;
        }
        Ok(())
    }

    fn join(&mut self) -> std::io::Result<WorkerStatus> {
        let Some(handle) = self.handle.take() else {
            return Ok(WorkerStatus::Detached);
        };

        if self.detached {
            drop(handle);
            return Ok(WorkerStatus::Detached);
        }

        handle
            .join()
            .map(WorkerStatus::Exited)
            .map_err(|_| std::io::Error::other(format!("worker thread {} panicked", self.name)))
    }
}
