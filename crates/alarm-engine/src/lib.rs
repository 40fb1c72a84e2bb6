//! # Alarm Engine
//!
//! Single entry point for collaborators: create, edit, snooze and inspect
//! alarms while the engine keeps them scheduled on the native and legacy
//! backends.
//!
//! ```rust,ignore
//! let paths = Paths::new()?;
//! let config = EngineConfig::load(&paths)?;
//! init_logging(&config.log_level, &paths)?;
//!
//! let engine = AlarmEngine::open(&paths, &config, ports)?;
//! let alarm = engine.create_alarm(AlarmSpec::new(
//!     Trigger::weekly([DayOfWeek::Mon, DayOfWeek::Fri], 7, 0),
//!     "Stand-up",
//! ))?;
//! engine.sync_now().await?;
//! assert_eq!(engine.get_alarm(&alarm.id)?.sync.status, SyncStatus::Synced);
//! ```

mod config;
mod engine;
mod error;
mod logging;
mod paths;
mod request;

pub use config::{EngineConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_LOG_LEVEL, LOG_LEVEL_ENV};
pub use engine::{AlarmEngine, EnginePorts};
pub use error::{CoreError, CoreResult, EngineError, EngineResult};
pub use logging::{init_logging, init_logging_for_service, parse_level};
pub use paths::Paths;
pub use request::{AlarmPatch, AlarmSpec};

pub use alarm_store::{
    AlarmFilter, AlarmId, AlarmRecord, DayOfWeek, SnoozePolicy, SoundRef, SyncStatus, Trigger,
};
pub use alarm_sync::{DriftReport, SyncEvent};
