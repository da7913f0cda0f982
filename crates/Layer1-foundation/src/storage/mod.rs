//! Storage module for isotask
//!
//! - `json`: JSON - 범용 파일 저장/로드

mod json;

pub use json::{JsonStore, STORE_DIR_NAME};
