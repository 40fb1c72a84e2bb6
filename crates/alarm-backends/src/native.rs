//! Adapter for the platform-native alarm scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use alarm_store::{AlarmId, AlarmRecord, BackendKind, SoundRef, Trigger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BackendAdapter, BackendError, BackendResult, ScheduleHandle};

/// What the native scheduler is asked to arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeScheduleRequest {
    pub alarm_id: AlarmId,
    pub trigger: Trigger,
    /// Overrides the trigger for the next occurrence only.
    pub snoozed_until: Option<DateTime<Utc>>,
    pub label: String,
    pub content_ref: Option<String>,
    pub sound: SoundRef,
}

/// An entry reported by the native scheduler's bulk listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeScheduled {
    pub alarm_id: AlarmId,
    pub handle: String,
}

/// Port to the platform scheduler.
///
/// `schedule` replaces any existing entry for the same alarm id.
#[async_trait]
pub trait NativeScheduler: Send + Sync {
    async fn schedule(&self, request: NativeScheduleRequest) -> BackendResult<String>;

    /// Removes the entry with `handle`. Returns false if it was absent.
    async fn cancel(&self, handle: &str) -> BackendResult<bool>;

    async fn list(&self) -> BackendResult<Vec<NativeScheduled>>;
}

pub struct NativeAdapter {
    port: Arc<dyn NativeScheduler>,
    handles: Mutex<HashMap<AlarmId, String>>,
}

impl NativeAdapter {
    pub fn new(port: Arc<dyn NativeScheduler>) -> Self {
        Self {
            port,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn request_for(record: &AlarmRecord, now: DateTime<Utc>) -> BackendResult<NativeScheduleRequest> {
        record
            .trigger
            .validate()
            .map_err(|e| BackendError::InvalidTrigger(e.to_string()))?;
        if record.next_fire_after(now).is_none() {
            return Err(BackendError::InvalidTrigger(format!(
                "alarm {} has no upcoming occurrence",
                record.id
            )));
        }
        Ok(NativeScheduleRequest {
            alarm_id: record.id.clone(),
            trigger: record.trigger.clone(),
            snoozed_until: record
                .snooze_state
                .snoozed_until
                .filter(|until| *until > now),
            label: record.label.clone(),
            content_ref: record.content_ref.clone(),
            sound: record.sound.clone(),
        })
    }

    async fn refresh_handles(&self) -> BackendResult<Vec<AlarmId>> {
        let scheduled = self.port.list().await?;
        let ids = scheduled.iter().map(|s| s.alarm_id.clone()).collect();
        *self.handles.lock() = scheduled
            .into_iter()
            .map(|s| (s.alarm_id, s.handle))
            .collect();
        Ok(ids)
    }
}

#[async_trait]
impl BackendAdapter for NativeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn supports_recurrence(&self) -> bool {
        true
    }

    async fn schedule(&self, record: &AlarmRecord) -> BackendResult<ScheduleHandle> {
        let request = Self::request_for(record, Utc::now())?;
        let handle = self.port.schedule(request).await?;
        self.handles.lock().insert(record.id.clone(), handle.clone());
        debug!(alarm_id = %record.id, handle = %handle, "native alarm scheduled");
        Ok(ScheduleHandle(handle))
    }

    async fn cancel(&self, id: &AlarmId) -> BackendResult<()> {
        let mut handle = self.handles.lock().get(id).cloned();
        if handle.is_none() {
            // Handles are not durable; recover them from the scheduler.
            self.refresh_handles().await?;
            handle = self.handles.lock().get(id).cloned();
        }
        let Some(handle) = handle else {
            return Ok(());
        };
        self.port.cancel(&handle).await?;
        self.handles.lock().remove(id);
        debug!(alarm_id = %id, "native alarm cancelled");
        Ok(())
    }

    async fn reconcile_list(&self) -> BackendResult<Vec<AlarmId>> {
        self.refresh_handles().await
    }
}
