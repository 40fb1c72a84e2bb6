//! # Alarm Backends
//!
//! Adapters that translate canonical alarm records into calls on the two
//! local scheduling backends:
//!
//! - [`NativeAdapter`] over a [`NativeScheduler`] port (platform scheduler,
//!   supports recurrence)
//! - [`LegacyAdapter`] over a [`LegacyNotificationCenter`] port (one-shot
//!   notifications only, holds alarms exportable for migration)
//!
//! The coordinator consumes both through [`BackendAdapter`] and tells them
//! apart only by [`BackendAdapter::kind`].

mod fault;
mod legacy;
mod memory;
mod native;

pub use fault::{Fault, FaultScript, PortOp};
pub use legacy::{LegacyAdapter, LegacyNotification, LegacyNotificationCenter};
pub use memory::{InMemoryLegacyCenter, InMemoryNativeScheduler, PortCall};
pub use native::{NativeAdapter, NativeScheduleRequest, NativeScheduled, NativeScheduler};

use alarm_store::{AlarmId, AlarmRecord, BackendKind, BlockReason, SnoozePolicy, SoundRef, Trigger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The user has not granted permission to schedule alarms.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend cannot represent this trigger.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("unknown backend error: {0}")]
    Unknown(String),
}

impl BackendError {
    /// Retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Unknown(_))
    }

    /// Counts against backend health.
    pub fn is_availability_failure(&self) -> bool {
        self.is_retryable()
    }

    /// Non-retryable failures block the backend for the record.
    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            Self::AuthorizationDenied(_) => Some(BlockReason::AuthorizationDenied),
            Self::InvalidTrigger(_) => Some(BlockReason::InvalidTrigger),
            Self::Unavailable(_) | Self::Unknown(_) => None,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidTrigger(_) => "invalid_trigger",
            Self::Unknown(_) => "unknown",
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Opaque backend-issued handle for a scheduled alarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleHandle(pub String);

impl ScheduleHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An alarm definition read out of the legacy store during migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedAlarm {
    pub id: AlarmId,
    pub trigger: Trigger,
    pub enabled: bool,
    pub label: String,
    pub content_ref: Option<String>,
    pub sound: SoundRef,
    pub snooze: SnoozePolicy,
}

/// A scheduling backend as seen by the coordinator.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the backend can host a recurring trigger natively.
    fn supports_recurrence(&self) -> bool;

    /// Schedules (or reschedules) the record's next occurrence.
    async fn schedule(&self, record: &AlarmRecord) -> BackendResult<ScheduleHandle>;

    /// Removes the alarm. Cancelling an absent alarm succeeds.
    async fn cancel(&self, id: &AlarmId) -> BackendResult<()>;

    /// Ids of every alarm the backend currently holds.
    async fn reconcile_list(&self) -> BackendResult<Vec<AlarmId>>;

    /// Alarm definitions held by the backend, for one-time migration.
    ///
    /// Only the legacy store holds exportable definitions.
    async fn export_all(&self) -> BackendResult<Vec<ExportedAlarm>> {
        Ok(Vec::new())
    }
}
