//! JSON 파일 저장소
//!
//! One directory of JSON documents. isotask keeps one store in the user's
//! config directory and one per project.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;

/// Directory name used for both the global and the project store
pub const STORE_DIR_NAME: &str = "isotask";

#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<config dir>/isotask/`
    pub fn global() -> Result<Self> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join(STORE_DIR_NAME)))
            .ok_or_else(|| Error::Config("no config directory on this platform".to_string()))
    }

    /// `<root>/.isotask/`
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(format!(".{STORE_DIR_NAME}")))
    }

    pub fn current_project() -> Result<Self> {
        std::env::current_dir()
            .map(Self::project)
            .map_err(|e| Error::Config(format!("working directory unavailable: {}", e)))
    }

    /// Parse `name`, or `None` when the document does not exist
    pub fn load_optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.root.join(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Config(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write `name` as pretty JSON, creating the store directory on demand
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.root.join(name);
        let text = serde_json::to_string_pretty(value)?;
        std::fs::create_dir_all(&self.root)
            .and_then(|()| std::fs::write(&path, text))
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}
