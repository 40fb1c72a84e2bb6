//! Events published by the coordinator.

use alarm_health::HealthStatus;
use alarm_store::{AlarmId, BackendKind, SyncStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A backend refused the alarm for a reason the user can act on.
    UserVisibleError {
        alarm_id: AlarmId,
        backend: BackendKind,
        message: String,
    },
    /// Transient failures used up every attempt; the alarm is degraded.
    RetriesExhausted {
        alarm_id: AlarmId,
        backend: BackendKind,
        attempts: u32,
        last_error: String,
    },
    /// Reconciliation found and repaired backend drift.
    DriftRepaired {
        backend: BackendKind,
        missing: usize,
        orphans: usize,
    },
    MigrationCompleted {
        imported: u64,
        skipped: u64,
    },
    BackendHealthChanged {
        backend: BackendKind,
        from: HealthStatus,
        to: HealthStatus,
    },
    StatusChanged {
        alarm_id: AlarmId,
        from: SyncStatus,
        to: SyncStatus,
    },
}
