//! Task defaults
//!
//! Defaults applied by task factories when the caller does not configure a
//! value explicitly. Loaded from `tasks.json` in the global store and then
//! the project store, project values winning.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 설정 파일명
pub const TASKS_CONFIG_FILE: &str = "tasks.json";

/// Kind of isolation unit a worker runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Forked child process (Unix only)
    Process,
    /// OS thread in the calling process
    Thread,
}

impl Default for Isolation {
    fn default() -> Self {
        if cfg!(unix) {
            Self::Process
        } else {
            Self::Thread
        }
    }
}

impl std::str::FromStr for Isolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "thread" => Ok(Self::Thread),
            other => Err(Error::InvalidInput(format!("unknown isolation kind: {other}"))),
        }
    }
}

/// Defaults for newly created tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefaults {
    /// Timeout in seconds; `0` means unbounded
    #[serde(default)]
    pub timeout_secs: f64,

    /// Isolation unit used for workers
    #[serde(default)]
    pub isolation: Isolation,

    /// How long a manager waits for a terminated worker to be reaped
    /// before giving up on its exit status
    #[serde(default = "default_reap_timeout_ms")]
    pub reap_timeout_ms: u64,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 0.0,
            isolation: Isolation::default(),
            reap_timeout_ms: default_reap_timeout_ms(),
        }
    }
}

/// One `tasks.json` as written on disk. Only the keys present in the file
/// are set, so a layer never resets what an earlier layer configured.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefaultsLayer {
    pub timeout_secs: Option<f64>,
    pub isolation: Option<Isolation>,
    pub reap_timeout_ms: Option<u64>,
}

impl TaskDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut stores = Vec::with_capacity(2);
        if let Ok(global) = JsonStore::global() {
            stores.push(global);
        }
        if let Ok(project) = JsonStore::current_project() {
            stores.push(project);
        }
        Self::load_layers(&stores)
    }

    /// Apply `tasks.json` from each store in order, later stores winning
    /// key by key, then validate.
    pub fn load_layers(stores: &[JsonStore]) -> Result<Self> {
        let mut defaults = Self::new();
        for store in stores {
            if let Some(layer) = store.load_optional::<TaskDefaultsLayer>(TASKS_CONFIG_FILE)? {
                defaults.merge(layer);
            }
        }
        defaults.validate()?;
        Ok(defaults)
    }

    /// Load from a single store, validating the result
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Self::load_layers(std::slice::from_ref(store))
    }

    pub fn save(&self, store: &JsonStore) -> Result<()> {
        self.validate()?;
        store.save(TASKS_CONFIG_FILE, self)
    }

    /// 다른 설정과 병합 (layer에 있는 키만 덮어씀)
    pub fn merge(&mut self, layer: TaskDefaultsLayer) {
        if let Some(timeout_secs) = layer.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if let Some(isolation) = layer.isolation {
            self.isolation = isolation;
        }
        if let Some(reap_timeout_ms) = layer.reap_timeout_ms {
            self.reap_timeout_ms = reap_timeout_ms;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            return Err(Error::Config(format!(
                "timeoutSecs must be a non-negative number, got {}",
                self.timeout_secs
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Accessors / Builder
    // ========================================================================

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    pub fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }
}

fn default_reap_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = TaskDefaults::new();
        assert_eq!(defaults.timeout(), Duration::ZERO);
        assert_eq!(defaults.reap_timeout(), Duration::from_secs(5));
        if cfg!(unix) {
            assert_eq!(defaults.isolation, Isolation::Process);
        }
    }

    #[test]
    fn test_parse_camel_case() {
        let json = r#"{ "timeoutSecs": 0.5, "isolation": "thread" }"#;
        let defaults: TaskDefaults = serde_json::from_str(json).unwrap();

        assert_eq!(defaults.timeout(), Duration::from_millis(500));
        assert_eq!(defaults.isolation, Isolation::Thread);
        assert_eq!(defaults.reap_timeout_ms, 5_000);
    }

    #[test]
    fn test_merge_only_present_keys() {
        let mut base = TaskDefaults::new()
            .with_timeout(Duration::from_secs(3))
            .with_isolation(Isolation::Thread);
        let layer: TaskDefaultsLayer = serde_json::from_str(r#"{ "reapTimeoutMs": 250 }"#).unwrap();

        base.merge(layer);

        assert_eq!(base.timeout(), Duration::from_secs(3));
        assert_eq!(base.isolation, Isolation::Thread);
        assert_eq!(base.reap_timeout_ms, 250);
    }

    #[test]
    fn test_merge_can_reset_to_builtin_values() {
        let mut base = TaskDefaults::new().with_timeout(Duration::from_secs(3));
        base.reap_timeout_ms = 100;

        base.merge(TaskDefaultsLayer {
            timeout_secs: Some(0.0),
            isolation: None,
            reap_timeout_ms: Some(5_000),
        });

        assert_eq!(base.timeout(), Duration::ZERO);
        assert_eq!(base.reap_timeout_ms, 5_000);
    }

    fn write_layer(dir: &std::path::Path, json: &str) -> JsonStore {
        std::fs::write(dir.join(TASKS_CONFIG_FILE), json).unwrap();
        JsonStore::new(dir)
    }

    #[test]
    fn test_load_layers_project_over_global() {
        let global_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let global = write_layer(
            global_dir.path(),
            r#"{ "timeoutSecs": 3, "isolation": "thread", "reapTimeoutMs": 800 }"#,
        );
        // no isolation key: the global choice must survive
        let project = write_layer(project_dir.path(), r#"{ "timeoutSecs": 0 }"#);

        let loaded = TaskDefaults::load_layers(&[global, project]).unwrap();

        assert_eq!(loaded.isolation, Isolation::Thread);
        assert_eq!(loaded.timeout(), Duration::ZERO);
        assert_eq!(loaded.reap_timeout_ms, 800);
    }

    #[test]
    fn test_load_layers_missing_files_give_builtin_defaults() {
        let empty = tempfile::tempdir().unwrap();
        let loaded = TaskDefaults::load_layers(&[JsonStore::new(empty.path())]).unwrap();
        assert_eq!(loaded, TaskDefaults::default());
    }

    #[test]
    fn test_load_layers_validates_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_layer(dir.path(), r#"{ "timeoutSecs": -2 }"#);
        assert!(matches!(
            TaskDefaults::load_layers(&[store]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_negative_timeout() {
        let defaults = TaskDefaults {
            timeout_secs: -1.0,
            ..TaskDefaults::default()
        };
        assert!(matches!(defaults.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let defaults = TaskDefaults::new()
            .with_timeout(Duration::from_secs(2))
            .with_isolation(Isolation::Thread);
        defaults.save(&store).unwrap();

        let loaded = TaskDefaults::load_from(&store).unwrap();
        assert_eq!(loaded, defaults);
    }

    #[test]
    fn test_isolation_from_str() {
        assert_eq!("PROCESS".parse::<Isolation>().unwrap(), Isolation::Process);
        assert_eq!("thread".parse::<Isolation>().unwrap(), Isolation::Thread);
        assert!("vm".parse::<Isolation>().is_err());
    }
}
