//! # isotask-foundation
//!
//! Foundation layer for isotask:
//! - Error: 공통 에러 타입
//! - Storage: JsonStore (글로벌/프로젝트 설정 파일)
//! - Config: task defaults (timeout, isolation kind)
//! - Logging: `tracing-subscriber` setup

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{Isolation, TaskDefaults, TaskDefaultsLayer, TASKS_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{JsonStore, STORE_DIR_NAME};
