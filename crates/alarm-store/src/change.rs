//! Change notifications emitted by the store.
//!
//! Changes are emitted after the SQLite commit and reflect committed state.
//! Sync-metadata writes and recovery emit nothing.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::AlarmId;

/// A committed change to user-owned alarm content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Created { id: AlarmId, version: u64 },
    Updated { id: AlarmId, version: u64 },
    /// The record was tombstoned and awaits backend cancellation.
    DeleteRequested { id: AlarmId, version: u64 },
    /// The row is gone.
    Purged { id: AlarmId },
}

impl StoreChange {
    pub fn id(&self) -> &AlarmId {
        match self {
            Self::Created { id, .. }
            | Self::Updated { id, .. }
            | Self::DeleteRequested { id, .. }
            | Self::Purged { id } => id,
        }
    }
}

/// Receives store changes.
pub trait ChangeSink: Send + Sync {
    /// Called after the corresponding write has been committed.
    fn emit(&self, change: StoreChange);
}

impl<T: ChangeSink + ?Sized> ChangeSink for Arc<T> {
    fn emit(&self, change: StoreChange) {
        (**self).emit(change)
    }
}

/// Discards all changes.
#[derive(Debug, Default)]
pub struct NullSink;

impl ChangeSink for NullSink {
    fn emit(&self, _change: StoreChange) {}
}

/// Records changes for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    changes: Mutex<Vec<StoreChange>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<StoreChange> {
        self.changes.lock().clone()
    }

    pub fn clear(&self) {
        self.changes.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChangeSink for RecordingSink {
    fn emit(&self, change: StoreChange) {
        self.changes.lock().push(change);
    }
}
