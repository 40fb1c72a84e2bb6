//! # Alarm Sync
//!
//! Mirrors canonical alarms from the store into the two scheduling backends.
//!
//! ## Flow
//!
//! 1. The store commits a change and emits it on the [`ChangeFeed`]
//! 2. The coordinator invalidates the cache entry and plans the alarm
//! 3. Planned work is queued as durable [`alarm_store::SyncTask`]s
//! 4. Due tasks run against the adapters with a deadline, bounded concurrency
//!    and exponential backoff
//! 5. Results update per-backend sync metadata and trigger another plan
//!
//! Reconciliation periodically compares what each backend holds with what
//! the store expects, and runs the one-time legacy migration until it completes.

pub mod config;
mod coordinator;
mod events;
mod feed;
mod migration;
pub mod planner;
mod reconcile;

#[cfg(test)]
mod tests;

pub use config::{compute_backoff, jittered_backoff, SyncConfig};
pub use coordinator::{Backends, Coordinator, CoordinatorHandle};
pub use events::SyncEvent;
pub use feed::{ChangeFeed, ChangeStream, SyncedStore};
pub use migration::MigrationReport;
pub use reconcile::DriftReport;

use alarm_backends::BackendError;
use alarm_store::{BackendKind, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{backend} backend error: {source}")]
    Backend {
        backend: BackendKind,
        #[source]
        source: BackendError,
    },

    #[error("adapter for {expected} reports kind {found}")]
    AdapterMismatch {
        expected: BackendKind,
        found: BackendKind,
    },

    #[error("coordinator already started")]
    AlreadyStarted,

    #[error("coordinator is not running")]
    Stopped,
}

pub type SyncResult<T> = Result<T, SyncError>;
