//! Core types for the alarm store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trigger::Trigger;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an alarm (UUID string).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(pub String);

impl AlarmId {
    /// Creates a new random alarm ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates an alarm ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the alarm ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AlarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AlarmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AlarmId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AlarmId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Backends and sync state
// ============================================================================

/// The two local scheduling backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Native,
    Legacy,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Native, BackendKind::Legacy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Legacy => "legacy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "native" => Some(Self::Native),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }

    /// The alternate backend.
    pub fn other(&self) -> Self {
        match self {
            Self::Native => Self::Legacy,
            Self::Legacy => Self::Native,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backends currently host an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    None,
    Native,
    Legacy,
    Both,
}

impl Affinity {
    pub fn from_bits(native: bool, legacy: bool) -> Self {
        match (native, legacy) {
            (false, false) => Self::None,
            (true, false) => Self::Native,
            (false, true) => Self::Legacy,
            (true, true) => Self::Both,
        }
    }

    pub fn contains(&self, backend: BackendKind) -> bool {
        matches!(
            (self, backend),
            (Self::Both, _)
                | (Self::Native, BackendKind::Native)
                | (Self::Legacy, BackendKind::Legacy)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Native => "native",
            Self::Legacy => "legacy",
            Self::Both => "both",
        }
    }
}

/// Aggregate synchronization status of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Unsynced,
    Pending,
    Synced,
    Degraded,
    Migrating,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Degraded => "degraded",
            Self::Migrating => "migrating",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "synced" => Self::Synced,
            "degraded" => Self::Degraded,
            "migrating" => Self::Migrating,
            _ => Self::Unsynced,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation carried by a sync task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

impl SyncOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Create,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// Why a backend is not used for a particular alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    AuthorizationDenied,
    InvalidTrigger,
    /// Transient failures used up every attempt. Lifted by reconciliation.
    RetriesExhausted,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied => "authorization_denied",
            Self::InvalidTrigger => "invalid_trigger",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }

    /// Whether the block comes from a non-retryable backend answer.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::RetriesExhausted)
    }
}

/// Per-backend synchronization metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSync {
    /// The backend currently hosts this alarm.
    pub affine: bool,
    /// Highest record version confirmed by the backend. Never lowered.
    pub last_synced_version: u64,
    /// Opaque backend handle from the last successful schedule.
    pub handle: Option<String>,
    /// Set after a non-retryable failure; cleared on the next user edit.
    pub block: Option<BlockReason>,
    /// Occurrence posted to a backend without recurrence support. Once it
    /// passes, the alarm is re-armed for the next one.
    #[serde(default)]
    pub armed_until: Option<DateTime<Utc>>,
}

impl BackendSync {
    /// The armed occurrence has passed and the backend holds nothing upcoming.
    pub fn needs_rearm(&self, now: DateTime<Utc>) -> bool {
        self.affine && self.armed_until.is_some_and(|at| at <= now)
    }
}

/// Synchronization metadata owned by the coordinator.
///
/// Mutating it never bumps the record version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub native: BackendSync,
    pub legacy: BackendSync,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    /// One-time migration from the legacy store is still in progress.
    pub migrating: bool,
}

impl SyncMeta {
    pub fn backend(&self, kind: BackendKind) -> &BackendSync {
        match kind {
            BackendKind::Native => &self.native,
            BackendKind::Legacy => &self.legacy,
        }
    }

    pub fn backend_mut(&mut self, kind: BackendKind) -> &mut BackendSync {
        match kind {
            BackendKind::Native => &mut self.native,
            BackendKind::Legacy => &mut self.legacy,
        }
    }

    pub fn affinity(&self) -> Affinity {
        Affinity::from_bits(self.native.affine, self.legacy.affine)
    }

    /// Clears all blocks on both backends.
    pub fn clear_blocks(&mut self) {
        self.native.block = None;
        self.legacy.block = None;
    }

    /// Clears only [`BlockReason::RetriesExhausted`] blocks. Returns true if any were set.
    pub fn clear_exhausted(&mut self) -> bool {
        let mut cleared = false;
        for kind in BackendKind::ALL {
            let backend = self.backend_mut(kind);
            if backend.block == Some(BlockReason::RetriesExhausted) {
                backend.block = None;
                cleared = true;
            }
        }
        cleared
    }

    pub fn is_exhausted(&self) -> bool {
        BackendKind::ALL
            .iter()
            .any(|kind| self.backend(*kind).block == Some(BlockReason::RetriesExhausted))
    }
}

// ============================================================================
// Alarm content
// ============================================================================

/// Sound to play when the alarm fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoundRef {
    pub name: String,
    /// Use the traditional ringtone if the named sound is unavailable.
    pub traditional_fallback: bool,
}

impl Default for SoundRef {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            traditional_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnoozePolicy {
    pub duration_secs: u32,
    pub max_count: u32,
}

impl Default for SnoozePolicy {
    fn default() -> Self {
        Self {
            duration_secs: 540,
            max_count: 3,
        }
    }
}

/// Snooze progress for the current occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnoozeState {
    pub count: u32,
    pub snoozed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    User,
    LegacyImport,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::LegacyImport => "legacy_import",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "legacy_import" => Self::LegacyImport,
            _ => Self::User,
        }
    }
}

/// The canonical, durable alarm record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: AlarmId,
    pub trigger: Trigger,
    pub enabled: bool,
    pub label: String,
    pub content_ref: Option<String>,
    pub sound: SoundRef,
    pub snooze: SnoozePolicy,
    pub snooze_state: SnoozeState,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Bumped by the store on every content mutation.
    pub version: u64,
    pub sync: SyncMeta,
    pub origin: Origin,
    /// Tombstone set while the delete cascade runs.
    pub pending_delete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlarmRecord {
    /// Builds an unsaved record (version 0) with default sync metadata.
    pub fn new(id: AlarmId, trigger: Trigger, label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            trigger,
            enabled: true,
            label: label.into(),
            content_ref: None,
            sound: SoundRef::default(),
            snooze: SnoozePolicy::default(),
            snooze_state: SnoozeState::default(),
            last_fired_at: None,
            version: 0,
            sync: SyncMeta::default(),
            origin: Origin::User,
            pending_delete: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compares user-visible content, ignoring version, sync metadata and timestamps.
    pub fn content_eq(&self, other: &AlarmRecord) -> bool {
        self.trigger == other.trigger
            && self.enabled == other.enabled
            && self.label == other.label
            && self.content_ref == other.content_ref
            && self.sound == other.sound
            && self.snooze == other.snooze
            && self.snooze_state == other.snooze_state
            && self.last_fired_at == other.last_fired_at
            && self.pending_delete == other.pending_delete
    }

    pub fn affinity(&self) -> Affinity {
        self.sync.affinity()
    }

    /// Enabled and not being deleted.
    pub fn is_live(&self) -> bool {
        self.enabled && !self.pending_delete
    }

    /// Next instant the alarm should ring, honouring an active snooze.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_live() {
            return None;
        }
        if let Some(until) = self.snooze_state.snoozed_until {
            if until > now {
                return Some(until);
            }
        }
        self.trigger.next_after(now)
    }
}

// ============================================================================
// Task queue and migration
// ============================================================================

/// A unit of backend work for one `(alarm, backend)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub alarm_id: AlarmId,
    pub backend: BackendKind,
    pub op: SyncOp,
    pub target_version: u64,
    pub attempt: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncTask {
    /// A fresh task, due immediately.
    pub fn new(alarm_id: AlarmId, backend: BackendKind, op: SyncOp, target_version: u64) -> Self {
        let now = Utc::now();
        Self {
            alarm_id,
            backend,
            op,
            target_version,
            attempt: 0,
            next_retry_at: now,
            last_error: None,
            enqueued_at: now,
        }
    }
}

/// Persisted state of the one-time legacy migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub imported: u64,
}

// ============================================================================
// Listing
// ============================================================================

/// Filter for [`crate::AlarmStore::list`].
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub enabled: Option<bool>,
    pub status: Option<SyncStatus>,
    /// Only alarms currently hosted by this backend.
    pub backend: Option<BackendKind>,
    pub include_pending_delete: bool,
    /// Reference instant for ordering; defaults to the listing time.
    pub now: Option<DateTime<Utc>>,
}

impl AlarmFilter {
    pub fn all() -> Self {
        Self {
            include_pending_delete: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &AlarmRecord) -> bool {
        if record.pending_delete && !self.include_pending_delete {
            return false;
        }
        if let Some(enabled) = self.enabled {
            if record.enabled != enabled {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.sync.status != status {
                return false;
            }
        }
        if let Some(backend) = self.backend {
            if !record.sync.backend(backend).affine {
                return false;
            }
        }
        true
    }
}
