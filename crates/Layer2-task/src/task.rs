//! Task handle
//!
//! A [`Task`] is the caller's view of one invocation. Clones share the same
//! underlying task. The outcome is set exactly once by the manager; `get`
//! can be called any number of times afterwards and always yields the same
//! outcome.

use crate::channel::{Channel, Signal};
use crate::error::TaskError;
use crate::state::TaskState;
use crate::worker::WorkerReport;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task (process-wide, increasing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion callback. Runs once, after the outcome is set and the worker
/// has been torn down. Errors and panics are logged and discarded.
pub type Callback<T> = Arc<dyn Fn(&Task<T>) -> anyhow::Result<()> + Send + Sync>;

struct Lifecycle {
    state: TaskState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

struct Inner<T> {
    id: TaskId,
    ordinal: u64,
    timeout: Duration,
    cancelled: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    /// Wakes `get_blocking`; paired with `lifecycle`
    finished: Condvar,
    /// Wakes async `get`
    ready: Notify,
    outcome: OnceLock<Result<T, TaskError>>,
    channel: Arc<Channel>,
    worker: OnceLock<WorkerReport>,
}

/// Handle to one asynchronous invocation
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("ordinal", &self.inner.ordinal)
            .field("state", &self.state())
            .field("timeout", &self.inner.timeout)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<T> Task<T> {
    /// Create a new task in the `Created` state
    pub(crate) fn new(ordinal: u64, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::next(),
                ordinal,
                timeout,
                cancelled: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    state: TaskState::Created,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                }),
                finished: Condvar::new(),
                ready: Notify::new(),
                outcome: OnceLock::new(),
                channel: Arc::new(Channel::new()),
                worker: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Position in the sequence of tasks issued by the creating factory
    pub fn ordinal(&self) -> u64 {
        self.inner.ordinal
    }

    /// Configured timeout; zero means unbounded
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn state(&self) -> TaskState {
        self.inner.lifecycle.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the outcome has been set
    pub fn is_done(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.lifecycle.lock().created_at
    }

    /// Time from worker start to finalization (or now, if still running)
    pub fn duration(&self) -> Option<Duration> {
        let lifecycle = self.inner.lifecycle.lock();
        let start = lifecycle.started_at?;
        let end = lifecycle.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }

    /// Teardown record, available once the manager has reaped the worker
    pub fn worker(&self) -> Option<&WorkerReport> {
        self.inner.worker.get()
    }

    /// Request cancellation.
    ///
    /// Best effort: a worker that is already executing is not interrupted.
    /// A cancellation signal races the worker's own result on the channel
    /// and whichever is written first becomes the outcome. Returns whether
    /// the signal was written, which is also when the task counts as
    /// cancelled. Always `false` once the worker's result (or its loss) has
    /// been observed.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        let injected = self.inner.channel.put(Signal::Cancelled);
        if injected {
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }
        debug!("Cancellation requested for task {} (injected: {})", self.id(), injected);
        injected
    }

    pub(crate) fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }

    pub(crate) fn mark_running(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state == TaskState::Created {
            lifecycle.state = TaskState::Running;
            lifecycle.started_at = Some(Utc::now());
        }
    }

    /// Set the outcome. Only the first call has any effect.
    pub(crate) fn set_outcome(&self, outcome: Result<T, TaskError>) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state.is_terminal() {
            return false;
        }

        let state = TaskState::from_outcome(&outcome);
        if self.inner.outcome.set(outcome).is_err() {
            return false;
        }
        lifecycle.state = state;
        lifecycle.completed_at = Some(Utc::now());
        drop(lifecycle);

        self.inner.finished.notify_all();
        self.inner.ready.notify_waiters();
        debug!("Task {} finalized as {}", self.id(), state);
        true
    }

    pub(crate) fn set_worker(&self, report: WorkerReport) {
        let _ = self.inner.worker.set(report);
    }
}

impl<T: Clone> Task<T> {
    /// Outcome if already set, without waiting
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        self.inner.outcome.get().cloned()
    }

    /// Wait for the outcome.
    ///
    /// `wait` bounds the caller's wait only; when it elapses the result is
    /// [`TaskError::WaitElapsed`] and the task keeps running. `None` waits
    /// until the task is terminal.
    pub async fn get(&self, wait: Option<Duration>) -> Result<T, TaskError> {
        let ready = async {
            loop {
                let notified = self.inner.ready.notified();
                tokio::pin!(notified);
                // register before checking, so a concurrent set_outcome is seen
                notified.as_mut().enable();

                if let Some(outcome) = self.inner.outcome.get() {
                    return outcome.clone();
                }
                notified.await;
            }
        };

        match wait {
            Some(wait) => tokio::time::timeout(wait, ready)
                .await
                .unwrap_or(Err(TaskError::WaitElapsed(wait))),
            None => ready.await,
        }
    }

    /// Blocking variant of [`get`](Self::get) for synchronous callers.
    ///
    /// Parks the calling thread; do not call it from inside an async task.
    pub fn get_blocking(&self, wait: Option<Duration>) -> Result<T, TaskError> {
        let bound = wait.map(|wait| (wait, Instant::now() + wait));
        let mut lifecycle = self.inner.lifecycle.lock();

        loop {
            if let Some(outcome) = self.inner.outcome.get() {
                return outcome.clone();
            }
            match bound {
                Some((wait, deadline)) => {
                    let timed_out = self
                        .inner
                        .finished
                        .wait_until(&mut lifecycle, deadline)
                        .timed_out();
                    if timed_out {
                        return self
                            .inner
                            .outcome
                            .get()
                            .cloned()
                            .unwrap_or(Err(TaskError::WaitElapsed(wait)));
                    }
                }
                None => self.inner.finished.wait(&mut lifecycle),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = Task::<u32>::new(0, Duration::ZERO);
        let b = Task::<u32>::new(1, Duration::ZERO);
        assert!(b.id() > a.id());
        assert_eq!(b.ordinal(), 1);
    }

    #[test]
    fn test_outcome_set_exactly_once() {
        let task = Task::<u32>::new(0, Duration::ZERO);
        task.mark_running();
        assert_eq!(task.state(), TaskState::Running);

        assert!(task.set_outcome(Ok(7)));
        assert!(!task.set_outcome(Err(TaskError::Cancelled)));

        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.try_get(), Some(Ok(7)));
        assert!(task.duration().is_some());
    }

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let task = Task::<String>::new(0, Duration::ZERO);
        task.set_outcome(Err(TaskError::Application {
            message: "x".to_string(),
            trace: "t".to_string(),
        }));

        let first = task.get(None).await;
        let second = task.get(Some(Duration::from_millis(1))).await;
        assert_eq!(first, second);
        assert_eq!(task.get_blocking(None), first);
    }

    #[tokio::test]
    async fn test_get_wait_elapses_without_finalizing() {
        let task = Task::<u32>::new(0, Duration::ZERO);

        let result = task.get(Some(Duration::from_millis(20))).await;
        assert_eq!(result, Err(TaskError::WaitElapsed(Duration::from_millis(20))));
        assert!(!task.is_done());
        assert_eq!(task.state(), TaskState::Created);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_wakes_on_outcome() {
        let task = Task::<u32>::new(0, Duration::ZERO);
        let setter = task.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            setter.set_outcome(Ok(5));
        });

        assert_eq!(task.get(Some(Duration::from_secs(5))).await, Ok(5));
    }

    #[test]
    fn test_get_blocking_wakes_on_outcome() {
        let task = Task::<u32>::new(0, Duration::ZERO);
        let setter = task.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            setter.set_outcome(Ok(9));
        });

        assert_eq!(task.get_blocking(Some(Duration::from_secs(5))), Ok(9));
        handle.join().unwrap();

        let pending = Task::<u32>::new(0, Duration::ZERO);
        assert_eq!(
            pending.get_blocking(Some(Duration::from_millis(10))),
            Err(TaskError::WaitElapsed(Duration::from_millis(10)))
        );
    }

    #[tokio::test]
    async fn test_cancel_rejected_once_worker_is_lost() {
        let task = Task::<u32>::new(0, Duration::ZERO);
        drop(crate::channel::Producer::new(Arc::clone(task.channel())));
        assert_eq!(
            task.channel().recv(None).await,
            crate::channel::Recv::Disconnected
        );

        // outcome not set yet (manager still reaping), cancel must not claim success
        assert!(!task.cancel());
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_cancel_flag_and_noop_after_terminal() {
        let task = Task::<u32>::new(0, Duration::ZERO);
        assert!(task.cancel());
        assert!(task.is_cancelled());
        // second signal loses the race against the first
        assert!(!task.cancel());
        assert!(task.is_cancelled());

        let done = Task::<u32>::new(0, Duration::ZERO);
        done.set_outcome(Ok(1));
        assert!(!done.cancel());
        assert!(!done.is_cancelled());
        assert_eq!(done.try_get(), Some(Ok(1)));
    }
}
