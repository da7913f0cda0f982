//! Config - 통합 설정 관리
//!
//! - `tasks.rs` - task defaults (timeout, isolation kind, reaping)

mod tasks;

pub use tasks::{Isolation, TaskDefaults, TaskDefaultsLayer, TASKS_CONFIG_FILE};
