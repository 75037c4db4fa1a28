//! Task configuration.
//!
//! Each task reads its settings from a host key-value store ([`ConfigStore`]).
//! The store can be an in-memory map, process environment variables, or an
//! `info` table in a TOML config file.
//!
//! # Keys
//!
//! | Key | Default | Description |
//! |---|---|---|
//! | `EXEC` | required | Program to run (looked up on `PATH`) |
//! | `ARG1` | task identity | First argument |
//! | `ARG2`..`ARG9` | unset | Further arguments; the list stops at the first gap |
//! | `TIMEOUT` | 3.2e9 | Deadline for one exchange, in seconds |
//!
//! With [`EnvConfigStore`] the keys become `ASUB_EXEC_<TASK>_<KEY>`, e.g.
//! `ASUB_EXEC_CALC_TIMEOUT`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::supervisor::TerminationPolicy;
use crate::telemetry::LogConfig;

/// Arguments after the program name (ARG1..ARG9).
pub const MAX_ARGS: usize = 9;

/// Default timeout: about a hundred years, i.e. effectively none.
pub const DEFAULT_TIMEOUT_SECS: f64 = 3.2e9;

/// Prefix of environment variables read by [`EnvConfigStore`].
pub const ENV_PREFIX: &str = "ASUB_EXEC";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Task {task}: no EXEC configured")]
    MissingExec { task: String },

    #[error("Task {task}: invalid TIMEOUT {value:?}")]
    InvalidTimeout { task: String, value: String },

    #[error("Task name must not be empty")]
    EmptyTaskName,

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),
}

/// Host key-value store holding per-task settings.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MapConfigStore {
    values: HashMap<String, String>,
}

impl MapConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}

impl ConfigStore for MapConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Store backed by `ASUB_EXEC_<TASK>_<KEY>` environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfigStore {
    prefix: String,
}

impl EnvConfigStore {
    pub fn new(task: &str) -> Self {
        let task: String = task
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        Self {
            prefix: format!("{ENV_PREFIX}_{task}_"),
        }
    }

    pub fn variable(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl ConfigStore for EnvConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable(key)).ok()
    }
}

/// Everything one worker needs to run exchanges.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
    pub identity: String,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub termination: TerminationPolicy,
}

impl TaskConfig {
    /// Build from explicit values, defaulting the rest.
    pub fn new(identity: &str, argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            identity: identity.to_string(),
            argv,
            timeout,
            termination: TerminationPolicy::default(),
        }
    }

    /// Read `EXEC`, `ARG1`..`ARG9` and `TIMEOUT` from `store`.
    pub fn from_store(identity: &str, store: &dyn ConfigStore) -> Result<Self, ConfigError> {
        if identity.is_empty() {
            return Err(ConfigError::EmptyTaskName);
        }
        let exec = store
            .get("EXEC")
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ConfigError::MissingExec {
                task: identity.to_string(),
            })?;

        let mut argv = vec![exec, store.get("ARG1").unwrap_or_else(|| identity.to_string())];
        let mut gap = None;
        for n in 2..=MAX_ARGS {
            let key = format!("ARG{n}");
            match (store.get(&key), gap.as_ref()) {
                (Some(arg), None) => argv.push(arg),
                (Some(_), Some(first_missing)) => {
                    warn!(task = %identity, ignored = %key, missing = %first_missing, "argument after a gap is ignored");
                }
                (None, None) => gap = Some(key),
                (None, Some(_)) => {}
            }
        }

        let timeout = match store.get("TIMEOUT") {
            Some(raw) => parse_timeout(identity, &raw)?,
            None => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self::new(identity, argv, timeout))
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

fn parse_timeout(task: &str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTimeout {
        task: task.to_string(),
        value: raw.to_string(),
    };
    let secs: f64 = raw.trim().parse().map_err(|_| invalid())?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

/// One `[[task]]` entry of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub name: String,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl ConfigStore for TaskEntry {
    fn get(&self, key: &str) -> Option<String> {
        self.info.get(key).cloned()
    }
}

/// Top-level config file.
///
/// ```toml
/// [logging]
/// format = "pretty"
/// level = "info"
///
/// [[task]]
/// name = "calc"
/// info = { EXEC = "/opt/bin/calc", TIMEOUT = "10" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

impl ManagerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve every task, failing on the first invalid one.
    pub fn task_configs(&self) -> Result<Vec<TaskConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.tasks.len());
        for entry in &self.tasks {
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateTask(entry.name.clone()));
            }
            out.push(TaskConfig::from_store(&entry.name, entry)?);
        }
        Ok(out)
    }

    pub fn task(&self, name: &str) -> Result<TaskConfig, ConfigError> {
        let entry = self
            .tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))?;
        TaskConfig::from_store(&entry.name, entry)
    }
}

/// Read and parse a TOML config file.
pub fn load_config_file(path: &Path) -> Result<ManagerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    ManagerConfig::from_toml(&text)
}
