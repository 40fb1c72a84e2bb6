//! Configuration management for the engine.

use std::path::Path;
use std::time::Duration;

use alarm_health::HealthConfig;
use alarm_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult, Paths};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default bound on derived-data cache entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "ALARM_ENGINE_LOG_LEVEL";

/// Main engine configuration.
///
/// Every field has a default, so a config file only needs the values it
/// changes. Durations are stored as plain integers for hand editing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Maximum derived-data cache entries. Must be positive.
    pub cache_capacity: usize,

    pub change_queue_capacity: usize,
    pub task_batch_size: usize,
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: f64,
    /// Deadline for a single backend call.
    pub call_timeout_ms: u64,
    pub dispatch_interval_ms: u64,
    pub reconcile_interval_secs: u64,

    pub health_window_size: usize,
    pub health_max_age_secs: u64,
    pub health_degraded_ratio: f64,
    pub health_unavailable_ratio: f64,
    pub health_min_samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        let health = HealthConfig::default();
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            change_queue_capacity: sync.change_queue_capacity,
            task_batch_size: sync.batch_size,
            max_concurrency: sync.max_concurrency,
            max_attempts: sync.max_attempts,
            backoff_base_ms: sync.backoff_base.as_millis() as u64,
            backoff_max_ms: sync.backoff_max.as_millis() as u64,
            backoff_jitter: sync.backoff_jitter,
            call_timeout_ms: sync.call_timeout.as_millis() as u64,
            dispatch_interval_ms: sync.dispatch_interval.as_millis() as u64,
            reconcile_interval_secs: sync.reconcile_interval.as_secs(),
            health_window_size: health.window_size,
            health_max_age_secs: health.max_age.as_secs(),
            health_degraded_ratio: health.degraded_ratio,
            health_unavailable_ratio: health.unavailable_ratio,
            health_min_samples: health.min_samples,
        }
    }
}

impl EngineConfig {
    /// Create a new EngineConfig with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file if present, falling back to
    /// defaults. Environment variables are applied last.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Only `log_level` can be overridden at runtime.
    fn load_from_env(&mut self) {
        self.apply_log_level_override(std::env::var(LOG_LEVEL_ENV).ok());
    }

    fn apply_log_level_override(&mut self, value: Option<String>) {
        if let Some(level) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache_capacity == 0 {
            return Err(CoreError::Config("cache_capacity must be positive".into()));
        }
        if self.change_queue_capacity == 0 {
            return Err(CoreError::Config(
                "change_queue_capacity must be positive".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::Config("max_attempts must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(CoreError::Config(format!(
                "backoff_jitter must be within 0..=1, got {}",
                self.backoff_jitter
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(CoreError::Config("call_timeout_ms must be positive".into()));
        }
        self.health_config()
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            change_queue_capacity: self.change_queue_capacity,
            batch_size: self.task_batch_size.max(1),
            max_concurrency: self.max_concurrency.max(1),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            backoff_jitter: self.backoff_jitter,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms.max(1)),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs.max(1)),
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            window_size: self.health_window_size,
            max_age: Duration::from_secs(self.health_max_age_secs),
            degraded_ratio: self.health_degraded_ratio,
            unavailable_ratio: self.health_unavailable_ratio,
            min_samples: self.health_min_samples,
        }
    }
}
