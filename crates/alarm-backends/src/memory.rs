//! In-memory ports with scripted fault injection.
//!
//! Every call is logged before its fault is applied, so tests can count
//! attempts that failed as well as ones that succeeded.

use std::collections::BTreeMap;

use alarm_store::AlarmId;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::fault::{FaultScript, PortOp};
use crate::legacy::{LegacyNotification, LegacyNotificationCenter};
use crate::native::{NativeScheduleRequest, NativeScheduled, NativeScheduler};
use crate::{BackendResult, ExportedAlarm};

/// One logged port call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCall {
    pub op: PortOp,
    pub alarm_id: Option<AlarmId>,
}

#[derive(Debug, Default)]
struct CallLog {
    calls: Mutex<Vec<PortCall>>,
}

impl CallLog {
    fn record(&self, op: PortOp, alarm_id: Option<&AlarmId>) {
        self.calls.lock().push(PortCall {
            op,
            alarm_id: alarm_id.cloned(),
        });
    }

    fn all(&self) -> Vec<PortCall> {
        self.calls.lock().clone()
    }

    fn count(&self, op: PortOp, alarm_id: Option<&AlarmId>) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == op && (alarm_id.is_none() || c.alarm_id.as_ref() == alarm_id))
            .count()
    }

    fn clear(&self) {
        self.calls.lock().clear();
    }
}

// ============================================================================
// Native
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryNativeScheduler {
    entries: Mutex<BTreeMap<AlarmId, (String, NativeScheduleRequest)>>,
    faults: FaultScript,
    log: CallLog,
}

impl InMemoryNativeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultScript {
        &self.faults
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.log.all()
    }

    /// Calls of `op`, optionally restricted to one alarm.
    pub fn call_count(&self, op: PortOp, alarm_id: Option<&AlarmId>) -> usize {
        self.log.count(op, alarm_id)
    }

    pub fn clear_calls(&self) {
        self.log.clear();
    }

    pub fn contains(&self, id: &AlarmId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn request_for(&self, id: &AlarmId) -> Option<NativeScheduleRequest> {
        self.entries.lock().get(id).map(|(_, req)| req.clone())
    }

    pub fn ids(&self) -> Vec<AlarmId> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts an entry the engine never asked for.
    pub fn insert_external(&self, request: NativeScheduleRequest) {
        let handle = format!("native-{}", Uuid::new_v4());
        self.entries
            .lock()
            .insert(request.alarm_id.clone(), (handle, request));
    }

    /// Drops an entry behind the engine's back.
    pub fn drop_external(&self, id: &AlarmId) -> bool {
        self.entries.lock().remove(id).is_some()
    }
}

#[async_trait]
impl NativeScheduler for InMemoryNativeScheduler {
    async fn schedule(&self, request: NativeScheduleRequest) -> BackendResult<String> {
        self.log.record(PortOp::Schedule, Some(&request.alarm_id));
        self.faults.apply(PortOp::Schedule).await?;
        let handle = format!("native-{}", Uuid::new_v4());
        self.entries
            .lock()
            .insert(request.alarm_id.clone(), (handle.clone(), request));
        Ok(handle)
    }

    async fn cancel(&self, handle: &str) -> BackendResult<bool> {
        let id = self
            .entries
            .lock()
            .iter()
            .find(|(_, (h, _))| h == handle)
            .map(|(id, _)| id.clone());
        self.log.record(PortOp::Cancel, id.as_ref());
        self.faults.apply(PortOp::Cancel).await?;
        Ok(match id {
            Some(id) => self.entries.lock().remove(&id).is_some(),
            None => false,
        })
    }

    async fn list(&self) -> BackendResult<Vec<NativeScheduled>> {
        self.log.record(PortOp::List, None);
        self.faults.apply(PortOp::List).await?;
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(id, (handle, _))| NativeScheduled {
                alarm_id: id.clone(),
                handle: handle.clone(),
            })
            .collect())
    }
}

// ============================================================================
// Legacy
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryLegacyCenter {
    pending: Mutex<BTreeMap<AlarmId, LegacyNotification>>,
    definitions: Mutex<BTreeMap<AlarmId, ExportedAlarm>>,
    faults: FaultScript,
    log: CallLog,
}

impl InMemoryLegacyCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultScript {
        &self.faults
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.log.all()
    }

    pub fn call_count(&self, op: PortOp, alarm_id: Option<&AlarmId>) -> usize {
        self.log.count(op, alarm_id)
    }

    pub fn clear_calls(&self) {
        self.log.clear();
    }

    /// Adds a legacy alarm definition as the old application would have.
    ///
    /// Enabled definitions with an upcoming occurrence are also posted.
    pub fn seed(&self, alarm: ExportedAlarm) {
        if alarm.enabled {
            if let Some(fire_at) = alarm.trigger.next_after(Utc::now()) {
                self.pending.lock().insert(
                    alarm.id.clone(),
                    LegacyNotification {
                        id: alarm.id.clone(),
                        fire_at,
                        title: alarm.label.clone(),
                        content_ref: alarm.content_ref.clone(),
                        sound_name: alarm.sound.name.clone(),
                    },
                );
            }
        }
        self.definitions.lock().insert(alarm.id.clone(), alarm);
    }

    pub fn contains(&self, id: &AlarmId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn notification(&self, id: &AlarmId) -> Option<LegacyNotification> {
        self.pending.lock().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<AlarmId> {
        self.pending.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Posts a notification the engine never asked for.
    pub fn insert_external(&self, notification: LegacyNotification) {
        self.pending
            .lock()
            .insert(notification.id.clone(), notification);
    }

    /// Drops a pending notification behind the engine's back.
    pub fn drop_external(&self, id: &AlarmId) -> bool {
        self.pending.lock().remove(id).is_some()
    }
}

#[async_trait]
impl LegacyNotificationCenter for InMemoryLegacyCenter {
    async fn post(&self, notification: LegacyNotification) -> BackendResult<()> {
        self.log.record(PortOp::Schedule, Some(&notification.id));
        self.faults.apply(PortOp::Schedule).await?;
        self.pending
            .lock()
            .insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn remove(&self, id: &AlarmId) -> BackendResult<bool> {
        self.log.record(PortOp::Cancel, Some(id));
        self.faults.apply(PortOp::Cancel).await?;
        let pending = self.pending.lock().remove(id).is_some();
        let defined = self.definitions.lock().remove(id).is_some();
        Ok(pending || defined)
    }

    async fn pending(&self) -> BackendResult<Vec<LegacyNotification>> {
        self.log.record(PortOp::List, None);
        self.faults.apply(PortOp::List).await?;
        Ok(self.pending.lock().values().cloned().collect())
    }

    async fn export(&self) -> BackendResult<Vec<ExportedAlarm>> {
        self.log.record(PortOp::Export, None);
        self.faults.apply(PortOp::Export).await?;
        Ok(self.definitions.lock().values().cloned().collect())
    }
}
