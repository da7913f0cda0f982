//! Task Manager - owns one task's lifecycle
//!
//! ```text
//! start ─► cancelled already? ──yes──► Cancelled ─────────────┐
//!             │ no                                            │
//!             ▼                                               │
//!          spawn worker ──err──► Spawn error ─────────────────┤
//!             │                                               │
//!             ▼                                               │
//!          recv(deadline)                                     │
//!             ├─ frame        ─► decoded outcome              │
//!             ├─ cancelled    ─► Cancelled                    │
//!             ├─ empty        ─► Timeout { timeout }          │
//!             └─ disconnected ─► (after reap) WorkerLost      │
//!             ▼                                               │
//!          terminate (unless lost) + reap worker              │
//!             ▼                                               ▼
//!          callback (errors/panics logged, never propagated) ◄┘
//! ```

use crate::channel::{Recv, Signal};
use crate::error::TaskError;
use crate::outcome::Envelope;
use crate::task::{Callback, Task};
use crate::worker::{entry, Job, Spawner, WorkerHandle, WorkerReport};
use serde::{de::DeserializeOwned, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Target function shared by every task a factory creates
pub type Target<A, T> = Arc<dyn Fn(A) -> anyhow::Result<T> + Send + Sync>;

/// Values a task can produce: they cross the worker boundary as JSON and are
/// handed out by clone from `Task::get`.
pub trait TaskValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> TaskValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Lifecycle manager for a single task
pub struct TaskManager<A, T> {
    task: Task<T>,
    target: Target<A, T>,
    args: A,
    spawner: Arc<dyn Spawner>,
    callback: Option<Callback<T>>,
    reap_timeout: Duration,
}

impl<A, T> TaskManager<A, T>
where
    A: Send + 'static,
    T: TaskValue,
{
    pub(crate) fn new(
        task: Task<T>,
        target: Target<A, T>,
        args: A,
        spawner: Arc<dyn Spawner>,
        callback: Option<Callback<T>>,
        reap_timeout: Duration,
    ) -> Self {
        Self {
            task,
            target,
            args,
            spawner,
            callback,
            reap_timeout,
        }
    }

    /// Run the lifecycle concurrently with the caller.
    ///
    /// Uses the current tokio runtime when there is one; otherwise a
    /// dedicated thread drives a current-thread runtime.
    pub(crate) fn start(self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(self.run());
            return;
        }

        let task = self.task.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("isotask-manager-{}", task.id().as_u64()))
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run()),
                    Err(e) => {
                        error!("Failed to build runtime for task {}: {}", self.task.id(), e);
                        self.task.set_outcome(Err(TaskError::Spawn(e.to_string())));
                    }
                }
            });

        if let Err(e) = spawned {
            error!("Failed to start manager for task {}: {}", task.id(), e);
            task.set_outcome(Err(TaskError::Spawn(e.to_string())));
        }
    }

    /// Drive the task from spawn to callback
    pub async fn run(self) {
        let TaskManager {
            task,
            target,
            args,
            spawner,
            callback,
            reap_timeout,
        } = self;
        let task_id = task.id();
        let deadline = (task.timeout() > Duration::ZERO).then(|| task.timeout());

        if task.is_cancelled() {
            debug!("Task {} cancelled before its worker was spawned", task_id);
            task.set_outcome(Err(TaskError::Cancelled));
            invoke_callback(&task, callback).await;
            return;
        }

        task.mark_running();
        let job: Job = Box::new(move || entry::run(target.as_ref(), args));

        let worker = match spawner.spawn(task_id, job, Arc::clone(task.channel())) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Failed to spawn {} worker for task {}: {}", spawner.name(), task_id, e);
                task.set_outcome(Err(TaskError::Spawn(e.to_string())));
                invoke_callback(&task, callback).await;
                return;
            }
        };
        info!("Running task {} in {}", task_id, worker.label());

        let lost = match task.channel().recv(deadline).await {
            Recv::Signal(Signal::Frame(frame)) => {
                task.set_outcome(Envelope::<T>::decode_outcome(&frame));
                false
            }
            Recv::Signal(Signal::Cancelled) => {
                info!("Task {} cancelled", task_id);
                task.set_outcome(Err(TaskError::Cancelled));
                false
            }
            Recv::Empty => {
                let timeout = task.timeout();
                warn!("Task {} timed out after {:.3}s", task_id, timeout.as_secs_f64());
                task.set_outcome(Err(TaskError::Timeout { timeout }));
                false
            }
            Recv::Disconnected => true,
        };

        // a lost worker has already gone away; reap it as-is to keep its status
        let report = teardown(worker, !lost, reap_timeout).await;
        if lost {
            let status = report.status.and_then(|s| s.code());
            warn!("Worker for task {} exited without an outcome ({:?})", task_id, report.status);
            task.set_outcome(Err(TaskError::WorkerLost { status }));
        }
        task.set_worker(report);

        invoke_callback(&task, callback).await;
    }
}

/// Terminate and reap. Reaping runs on the blocking pool and is bounded by
/// `reap_timeout`; an unreaped worker is reported with no status.
async fn teardown(
    mut worker: Box<dyn WorkerHandle>,
    terminate: bool,
    reap_timeout: Duration,
) -> WorkerReport {
    let label = worker.label();
    let pid = worker.pid();

    if terminate {
        if let Err(e) = worker.terminate() {
            warn!("Failed to terminate {}: {}", label, e);
        }
    }

    let join = tokio::task::spawn_blocking(move || worker.join());
    let status = match tokio::time::timeout(reap_timeout, join).await {
        Ok(Ok(Ok(status))) => Some(status),
        Ok(Ok(Err(e))) => {
            warn!("Failed to reap {}: {}", label, e);
            None
        }
        Ok(Err(e)) => {
            error!("Reaper for {} failed: {}", label, e);
            None
        }
        Err(_) => {
            warn!("{} not reaped within {:?}", label, reap_timeout);
            None
        }
    };

    debug!("Tore down {} ({:?})", label, status);
    WorkerReport { label, pid, status }
}

/// Run the callback on the blocking pool; its failures never reach the task.
async fn invoke_callback<T>(task: &Task<T>, callback: Option<Callback<T>>)
where
    T: Send + Sync + 'static,
{
    let Some(callback) = callback else {
        return;
    };

    let task = task.clone();
    let task_id = task.id();
    let result = tokio::task::spawn_blocking(move || {
        panic::catch_unwind(AssertUnwindSafe(|| callback(&task)))
    })
    .await;

    match result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("Callback for task {} failed: {:#}", task_id, e),
        Ok(Err(payload)) => error!(
            "Callback for task {} panicked: {}",
            task_id,
            entry::panic_message(payload.as_ref())
        ),
        Err(e) => error!("Callback for task {} could not run: {}", task_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::state::TaskState;
    use crate::task::TaskId;
    use crate::worker::ThreadSpawner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSpawner;

    impl Spawner for FailingSpawner {
        fn spawn(
            &self,
            _task_id: TaskId,
            _job: Job,
            _channel: Arc<Channel>,
        ) -> std::io::Result<Box<dyn WorkerHandle>> {
            Err(std::io::Error::other("no isolation units left"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn manager<A: Send + 'static, T: TaskValue>(
        task: &Task<T>,
        target: impl Fn(A) -> anyhow::Result<T> + Send + Sync + 'static,
        args: A,
        spawner: Arc<dyn Spawner>,
        callback: Option<Callback<T>>,
    ) -> TaskManager<A, T> {
        TaskManager::new(
            task.clone(),
            Arc::new(target),
            args,
            spawner,
            callback,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_run_completes() {
        let task = Task::new(0, Duration::ZERO);
        manager(&task, |x: u32| Ok(x * 2), 21, Arc::new(ThreadSpawner::new()), None)
            .run()
            .await;

        assert_eq!(task.get(None).await, Ok(42));
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.worker().is_some());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_surfaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback: Callback<u32> = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let task = Task::new(0, Duration::ZERO);
        manager(&task, |x: u32| Ok(x), 1, Arc::new(FailingSpawner), Some(callback))
            .run()
            .await;

        match task.get(None).await {
            Err(TaskError::Spawn(message)) => assert!(message.contains("no isolation units")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(task.worker().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_spawn_skips_worker() {
        let task = Task::new(0, Duration::ZERO);
        assert!(task.cancel());

        manager(&task, |x: u32| Ok(x), 1, Arc::new(FailingSpawner), None)
            .run()
            .await;

        assert_eq!(task.get(None).await, Err(TaskError::Cancelled));
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_io_fault_is_worker_lost() {
        let task = Task::new(0, Duration::ZERO);
        manager(
            &task,
            |_: ()| -> anyhow::Result<u32> {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "socket vanished").into())
            },
            (),
            Arc::new(ThreadSpawner::new()),
            None,
        )
        .run()
        .await;

        assert_eq!(
            task.get(None).await,
            Err(TaskError::WorkerLost {
                status: Some(crate::worker::FAULT_EXIT_CODE)
            })
        );
    }

    #[tokio::test]
    async fn test_callback_error_is_swallowed() {
        let callback: Callback<u32> = Arc::new(|_| anyhow::bail!("callback exploded"));

        let task = Task::new(0, Duration::ZERO);
        manager(&task, |x: u32| Ok(x + 1), 1, Arc::new(ThreadSpawner::new()), Some(callback))
            .run()
            .await;

        assert_eq!(task.get(None).await, Ok(2));
    }
}
