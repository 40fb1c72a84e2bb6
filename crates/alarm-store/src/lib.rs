//! # Alarm Store
//!
//! The durable source of truth for alarms.
//!
//! ## Principles
//!
//! - **SQLite is the only durable store** - every write commits to SQLite first
//! - **Reads come from a derived index** - rebuilt from SQLite on open
//! - **Changes reflect committed reality** - emitted after the commit
//! - **Recovery emits nothing**
//!
//! ## Example
//!
//! ```rust
//! use alarm_store::{AlarmId, AlarmRecord, AlarmStore, DayOfWeek, RecordingSink, Trigger};
//!
//! let store = AlarmStore::in_memory(RecordingSink::new()).unwrap();
//! let record = AlarmRecord::new(
//!     AlarmId::new(),
//!     Trigger::weekly([DayOfWeek::Mon, DayOfWeek::Fri], 7, 0),
//!     "Stand-up",
//! );
//!
//! let stored = store.put(record).unwrap();
//! assert_eq!(stored.version, 1);
//! assert_eq!(store.sink().len(), 1);
//! ```

pub mod change;
mod locks;
pub mod migrations;
mod sqlite;
mod store;
pub mod trigger;
pub mod types;

#[cfg(test)]
mod tests;

pub use change::{ChangeSink, NullSink, RecordingSink, StoreChange};
pub use locks::{KeyGuard, KeyedLocks};
pub use store::{AlarmListing, AlarmStore};
pub use trigger::{DayOfWeek, Trigger, TriggerError};
pub use types::{
    Affinity, AlarmFilter, AlarmId, AlarmRecord, BackendKind, BackendSync, BlockReason,
    MigrationState, Origin, SnoozePolicy, SnoozeState, SoundRef, SyncMeta, SyncOp, SyncStatus,
    SyncTask,
};

/// Errors that can occur in the alarm store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("alarm not found: {0}")]
    NotFound(AlarmId),

    #[error("version conflict for alarm {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: AlarmId,
        expected: u64,
        found: u64,
    },

    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
