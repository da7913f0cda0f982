//! Workers
//!
//! Isolation units that run a task's target:
//! - `ProcessSpawner` - forked child process, killed and reaped on teardown (Unix)
//! - `ThreadSpawner` - OS thread in the calling process, detached on teardown
//!
//! Both run the same entry point (`entry::run`), so the outcome is always
//! marshaled into a frame before it reaches the channel.

pub mod entry;
#[cfg(unix)]
pub mod process;
pub mod thread;
pub mod r#trait;

#[cfg(unix)]
pub use process::ProcessSpawner;
pub use r#trait::{Job, Spawner, WorkerExit, WorkerHandle, WorkerReport, WorkerStatus};
pub use thread::ThreadSpawner;

use isotask_foundation::Isolation;
use std::sync::Arc;

/// Exit code of a worker that failed with an OS/IO error
pub const FAULT_EXIT_CODE: i32 = 1;

/// Spawner for the configured isolation kind
pub fn default_spawner(isolation: Isolation) -> Arc<dyn Spawner> {
    match isolation {
        #[cfg(unix)]
        Isolation::Process => Arc::new(ProcessSpawner::new()),
        #[cfg(not(unix))]
        Isolation::Process => {
            tracing::warn!("Process isolation is not supported on this platform, using threads");
            Arc::new(ThreadSpawner::new())
        }
        Isolation::Thread => Arc::new(ThreadSpawner::new()),
    }
}
