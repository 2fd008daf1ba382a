//! Engine configuration.
//!
//! Every field has a default, so `{}` is a valid config file. Values can be
//! overridden from the environment after loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpindleError};

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_RETRY: u32 = 25;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const ENV_CONCURRENCY: &str = "SPINDLE_CONCURRENCY";
pub const ENV_STORE_PATH: &str = "SPINDLE_STORE_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of executors in the worker pool.
    pub concurrency: usize,

    /// Queue name -> weight.
    pub queues: BTreeMap<String, u32>,

    /// Drain higher-weight queues first instead of weighted round-robin.
    pub strict_priority: bool,

    pub store: StoreConfig,
    pub retry: RetryConfig,

    /// Scheduler sweep interval.
    pub poll_interval_ms: u64,

    /// Executor sleep when no queue had anything to claim.
    pub idle_backoff_ms: u64,

    /// Execution timeout for tasks that did not set their own.
    pub default_timeout_secs: u64,

    pub janitor_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: BTreeMap::from([(DEFAULT_QUEUE.to_string(), 1)]),
            strict_priority: false,
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            poll_interval_ms: 5_000,
            idle_backoff_ms: 1_000,
            default_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            janitor_interval_ms: 8_000,
            shutdown_timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

/// Backoff settings in milliseconds. See `RetryPolicy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60 * 60 * 1_000,
            jitter_ms: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SpindleError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SpindleError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Apply `SPINDLE_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as `apply_env_overrides`, with an explicit lookup.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            self.concurrency = raw.trim().parse().map_err(|_| {
                SpindleError::Config(format!("{ENV_CONCURRENCY} must be an integer, got {raw:?}"))
            })?;
        }
        if let Some(path) = lookup(ENV_STORE_PATH)
            && !path.trim().is_empty()
        {
            self.store = StoreConfig::File {
                path: PathBuf::from(path),
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SpindleError::Config("concurrency must be at least 1".into()));
        }
        if self.queues.is_empty() {
            return Err(SpindleError::Config("at least one queue is required".into()));
        }
        for (name, weight) in &self.queues {
            crate::domain::validate_queue_name(name)
                .map_err(|e| SpindleError::Config(e.to_string()))?;
            if *weight == 0 {
                return Err(SpindleError::Config(format!(
                    "queue {name:?} must have a positive weight"
                )));
            }
        }
        if self.retry.base_delay_ms == 0 {
            return Err(SpindleError::Config("retry.base_delay_ms must be positive".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(SpindleError::Config(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("idle_backoff_ms", self.idle_backoff_ms),
            ("default_timeout_secs", self.default_timeout_secs),
            ("janitor_interval_ms", self.janitor_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(SpindleError::Config(format!("{name} must be positive")));
        }
        if let StoreConfig::File { path } = &self.store
            && path.as_os_str().is_empty()
        {
            return Err(SpindleError::Config("store.path must not be empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
