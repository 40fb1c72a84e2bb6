//! File system paths for the engine.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Name of the engine's directory under the home directory.
const BASE_DIR_NAME: &str = ".alarm-engine";
const DATABASE_FILE_NAME: &str = "alarms.sqlite";
const LOG_FILE_NAME: &str = "engine.jsonl";

/// Manages file system paths for the engine.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.alarm-engine)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.alarm-engine`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.alarm-engine).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.alarm-engine/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the database file path (~/.alarm-engine/alarms.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    /// Get the logs directory (~/.alarm-engine/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.alarm-engine/logs/engine.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Rendered alarm content lives here (~/.alarm-engine/content).
    pub fn content_dir(&self) -> PathBuf {
        self.base_dir.join("content")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.content_dir())?;
        Ok(())
    }
}
