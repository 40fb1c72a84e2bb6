//! Logging initialization for the engine.
//!
//! All processes share the observability package's JSONL file, by default
//! `~/.alarm-engine/logs/engine.jsonl`.

use std::path::PathBuf;

pub use observability::{init_with_config, LogConfig};

use crate::{CoreResult, Paths};

/// Initialize logging for the engine process.
///
/// - Structured JSONL output to the paths' log file
/// - Level from `RUST_LOG` or the provided default
/// - Compact stderr output for foreground runs
pub fn init_logging(level: &str, paths: &Paths) -> CoreResult<PathBuf> {
    init_logging_for_service("alarm-engine", level, paths, true)
}

/// Initialize logging with a custom service name, so several tools can be
/// told apart in the shared log file.
pub fn init_logging_for_service(
    service_name: &str,
    level: &str,
    paths: &Paths,
    also_stderr: bool,
) -> CoreResult<PathBuf> {
    let path = observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })?;
    Ok(path)
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
