//! # isotask
//!
//! Run a function in an isolated worker and get a [`Task`] handle back.
//!
//! ```text
//! TaskFactory::call(args)
//!   ├─► Task (returned immediately)
//!   └─► TaskManager (tokio task)
//!         ├─ Spawner ─► worker: entry::run(target, args) ─► frame
//!         ├─ Channel: frame | cancel | deadline | worker gone
//!         ├─ teardown: terminate + reap
//!         └─ callback
//! ```
//!
//! ## Features
//!
//! - Process isolation via fork (Unix) or OS threads
//! - Optional timeout per task; the worker is killed when it expires
//! - Best-effort cancellation racing the worker's result
//! - Completion callback whose failures are logged, never propagated
//! - Errors carry a message and a formatted trace from inside the worker

pub mod channel;
pub mod error;
pub mod factory;
pub mod manager;
pub mod outcome;
pub mod state;
pub mod task;
pub mod worker;

pub use channel::{Channel, Signal};
pub use error::TaskError;
pub use factory::{TaskBuilder, TaskFactory};
pub use manager::{Target, TaskManager, TaskValue};
pub use outcome::{Envelope, FailureKind};
pub use state::TaskState;
pub use task::{Callback, Task, TaskId};

// Workers
#[cfg(unix)]
pub use worker::ProcessSpawner;
pub use worker::{
    default_spawner, Spawner, ThreadSpawner, WorkerHandle, WorkerReport, WorkerStatus,
};

pub use isotask_foundation::{Isolation, TaskDefaults};
