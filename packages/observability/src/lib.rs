//! # Observability
//!
//! Structured logging for the alarm engine and its tools.
//!
//! ## Design Philosophy
//!
//! Crates are **log producers**. They use the standard `tracing` macros with
//! key-value fields (`alarm_id`, `backend`, `version`, `attempt`) and know
//! nothing about where the lines end up. The process entry point calls
//! [`init_with_config`] once.
//!
//! ## Output
//!
//! Every event becomes one JSON line appended to a central file, by default
//! `~/.alarm-engine/logs/engine.jsonl`:
//!
//! - `tail -f ~/.alarm-engine/logs/engine.jsonl | jq` for pretty JSON
//! - `jq 'select(.fields.alarm_id == "...")'` to follow one alarm
//!
//! Writes are append-only and flushed per line, so several processes (the
//! engine and `alarmctl`) can share the file.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "alarm-engine".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//!
//! tracing::info!(alarm_id = %id, "alarm created");
//! ```

mod file;
mod json_layer;

use std::path::PathBuf;

pub use file::{default_log_path, CentralLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the process (e.g. "alarm-engine", "alarmctl").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default filter directive (e.g. "debug", "info,alarm_sync=trace").
    /// Overridden by `RUST_LOG` when set.
    pub default_level: String,

    /// Log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact human-readable lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "alarm-engine".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("could not determine home directory for the default log path")]
    NoHomeDir,

    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Initializes logging for `service_name` with default settings.
pub fn init(service_name: &str) -> Result<PathBuf, InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Installs the global subscriber: JSONL file layer plus optional stderr.
///
/// Returns the path of the log file in use.
pub fn init_with_config(config: LogConfig) -> Result<PathBuf, InitError> {
    file::init_file_subscriber(&config)
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
