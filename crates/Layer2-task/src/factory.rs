//! Task factory - turns a plain function into something that returns tasks
//!
//! ```ignore
//! let square = TaskFactory::new(|x: u64| Ok(x * x)).with_timeout(Duration::from_secs(2));
//! let task = square.call(7);
//! assert_eq!(task.get(None).await?, 49);
//! ```

use crate::manager::{Target, TaskManager, TaskValue};
use crate::task::{Callback, Task};
use crate::worker::{default_spawner, Spawner};
use isotask_foundation::TaskDefaults;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Wraps a target function; every `call` starts a new isolated task.
pub struct TaskFactory<A, T> {
    target: Target<A, T>,
    timeout: Duration,
    callback: Option<Callback<T>>,
    spawner: Arc<dyn Spawner>,
    reap_timeout: Duration,
    /// Ordinal sequence, shared with factories produced by `bind`
    issued: Arc<AtomicU64>,
}

impl<A, T> Clone for TaskFactory<A, T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            timeout: self.timeout,
            callback: self.callback.clone(),
            spawner: Arc::clone(&self.spawner),
            reap_timeout: self.reap_timeout,
            issued: Arc::clone(&self.issued),
        }
    }
}

impl<A, T> std::fmt::Debug for TaskFactory<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFactory")
            .field("timeout", &self.timeout)
            .field("callback", &self.callback.is_some())
            .field("spawner", &self.spawner.name())
            .field("issued", &self.issued.load(Ordering::SeqCst))
            .finish()
    }
}

impl<A, T> TaskFactory<A, T>
where
    A: Send + 'static,
    T: TaskValue,
{
    /// Wrap `target` with the built-in defaults: no timeout, no callback,
    /// process isolation where available.
    pub fn new<F>(target: F) -> Self
    where
        F: Fn(A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::from_target(Arc::new(target), &TaskDefaults::default())
    }

    fn from_target(target: Target<A, T>, defaults: &TaskDefaults) -> Self {
        Self {
            target,
            timeout: defaults.timeout(),
            callback: None,
            spawner: default_spawner(defaults.isolation),
            reap_timeout: defaults.reap_timeout(),
            issued: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Apply timeout, isolation and reap timeout from loaded defaults
    pub fn with_config(mut self, defaults: &TaskDefaults) -> Self {
        self.timeout = defaults.timeout();
        self.spawner = default_spawner(defaults.isolation);
        self.reap_timeout = defaults.reap_timeout();
        self
    }

    /// Zero disables the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(&Task<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of tasks issued so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Start `target(args)` in a new worker and return its task at once.
    pub fn call(&self, args: A) -> Task<T> {
        let ordinal = self.issued.fetch_add(1, Ordering::SeqCst);
        let task = Task::new(ordinal, self.timeout);
        debug!(
            "Issuing task {} (ordinal {}, {} worker)",
            task.id(),
            ordinal,
            self.spawner.name()
        );

        TaskManager::new(
            task.clone(),
            Arc::clone(&self.target),
            args,
            Arc::clone(&self.spawner),
            self.callback.clone(),
            self.reap_timeout,
        )
        .start();

        task
    }
}

impl<R, A, T> TaskFactory<(R, A), T>
where
    R: Clone + Send + Sync + 'static,
    A: Send + 'static,
    T: TaskValue,
{
    /// Fix the receiver of a method-like target.
    ///
    /// The bound factory keeps this factory's configuration and draws
    /// ordinals from the same sequence.
    pub fn bind(&self, receiver: R) -> TaskFactory<A, T> {
        let target = Arc::clone(&self.target);
        TaskFactory {
            target: Arc::new(move |args: A| target((receiver.clone(), args))),
            timeout: self.timeout,
            callback: self.callback.clone(),
            spawner: Arc::clone(&self.spawner),
            reap_timeout: self.reap_timeout,
            issued: Arc::clone(&self.issued),
        }
    }
}

/// One-off task with explicit configuration
pub struct TaskBuilder<A, T> {
    factory: TaskFactory<A, T>,
    args: A,
}

impl<A, T> TaskBuilder<A, T>
where
    A: Send + 'static,
    T: TaskValue,
{
    pub fn new<F>(target: F, args: A) -> Self
    where
        F: Fn(A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            factory: TaskFactory::new(target),
            args,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.factory = self.factory.with_timeout(timeout);
        self
    }

    pub fn callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(&Task<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.factory = self.factory.with_callback(callback);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.factory = self.factory.with_spawner(spawner);
        self
    }

    pub fn config(mut self, defaults: &TaskDefaults) -> Self {
        self.factory = self.factory.with_config(defaults);
        self
    }

    /// Start the task
    pub fn spawn(self) -> Task<T> {
        self.factory.call(self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::worker::ThreadSpawner;
    use isotask_foundation::Isolation;

    fn threads() -> Arc<dyn Spawner> {
        Arc::new(ThreadSpawner::new())
    }

    #[tokio::test]
    async fn test_call_issues_ordinals() {
        let factory = TaskFactory::new(|x: u32| Ok(x + 1)).with_spawner(threads());

        let first = factory.call(1);
        let second = factory.call(2);

        assert_eq!(first.ordinal(), 0);
        assert_eq!(second.ordinal(), 1);
        assert_eq!(factory.issued(), 2);
        assert_eq!(first.get(None).await, Ok(2));
        assert_eq!(second.get(None).await, Ok(3));
    }

    #[tokio::test]
    async fn test_bind_shares_sequence_and_config() {
        #[derive(Clone)]
        struct Scaler {
            factor: u32,
        }

        let method = TaskFactory::new(|(this, x): (Scaler, u32)| Ok(this.factor * x))
            .with_timeout(Duration::from_secs(3))
            .with_spawner(threads());
        let bound = method.bind(Scaler { factor: 10 });

        assert_eq!(bound.timeout(), Duration::from_secs(3));
        let a = bound.call(4);
        let b = method.call((Scaler { factor: 2 }, 4));

        assert_eq!(a.get(None).await, Ok(40));
        assert_eq!(b.get(None).await, Ok(8));
        assert_eq!(a.ordinal(), 0);
        assert_eq!(b.ordinal(), 1);
        assert_eq!(method.issued(), 2);
    }

    #[test]
    fn test_with_config_applies_defaults() {
        let defaults = TaskDefaults::default()
            .with_timeout(Duration::from_millis(1500))
            .with_isolation(Isolation::Thread);

        let factory = TaskFactory::new(|x: u32| Ok(x)).with_config(&defaults);
        assert_eq!(factory.timeout(), Duration::from_millis(1500));
        assert_eq!(factory.spawner.name(), "thread");
    }

    #[test]
    fn test_call_without_runtime() {
        let task = TaskBuilder::new(|(a, b): (i64, i64)| Ok(a * b), (6, 7))
            .spawner(threads())
            .timeout(Duration::from_secs(5))
            .spawn();

        assert_eq!(task.get_blocking(Some(Duration::from_secs(10))), Ok(42));
    }

    #[tokio::test]
    async fn test_builder_timeout() {
        let task = TaskBuilder::new(
            |_: ()| -> anyhow::Result<u32> {
                std::thread::sleep(Duration::from_secs(2));
                Ok(1)
            },
            (),
        )
        .spawner(threads())
        .timeout(Duration::from_millis(50))
        .spawn();

        assert_eq!(
            task.get(None).await,
            Err(TaskError::Timeout {
                timeout: Duration::from_millis(50)
            })
        );
    }
}
