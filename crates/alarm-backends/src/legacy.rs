//! Adapter for the legacy application-managed notification store.
//!
//! The legacy store only understands one-shot notifications. A weekly alarm
//! is armed for its next occurrence and must be re-armed after it fires.

use std::sync::Arc;

use alarm_store::{AlarmId, AlarmRecord, BackendKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BackendAdapter, BackendError, BackendResult, ExportedAlarm, ScheduleHandle};

/// A one-shot notification posted to the legacy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyNotification {
    pub id: AlarmId,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub content_ref: Option<String>,
    pub sound_name: String,
}

/// Port to the legacy notification center.
///
/// `post` replaces any pending notification with the same id.
#[async_trait]
pub trait LegacyNotificationCenter: Send + Sync {
    async fn post(&self, notification: LegacyNotification) -> BackendResult<()>;

    /// Removes the notification and any stored definition for `id`.
    /// Returns false if nothing was there.
    async fn remove(&self, id: &AlarmId) -> BackendResult<bool>;

    async fn pending(&self) -> BackendResult<Vec<LegacyNotification>>;

    /// Full alarm definitions kept by the legacy application.
    async fn export(&self) -> BackendResult<Vec<ExportedAlarm>>;
}

pub struct LegacyAdapter {
    center: Arc<dyn LegacyNotificationCenter>,
}

impl LegacyAdapter {
    pub fn new(center: Arc<dyn LegacyNotificationCenter>) -> Self {
        Self { center }
    }

    fn notification_for(
        record: &AlarmRecord,
        now: DateTime<Utc>,
    ) -> BackendResult<LegacyNotification> {
        record
            .trigger
            .validate()
            .map_err(|e| BackendError::InvalidTrigger(e.to_string()))?;
        let fire_at = record.next_fire_after(now).ok_or_else(|| {
            BackendError::InvalidTrigger(format!("alarm {} has no upcoming occurrence", record.id))
        })?;
        let sound_name = if record.sound.name.is_empty() && record.sound.traditional_fallback {
            "traditional".to_string()
        } else {
            record.sound.name.clone()
        };
        Ok(LegacyNotification {
            id: record.id.clone(),
            fire_at,
            title: record.label.clone(),
            content_ref: record.content_ref.clone(),
            sound_name,
        })
    }
}

#[async_trait]
impl BackendAdapter for LegacyAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn supports_recurrence(&self) -> bool {
        false
    }

    async fn schedule(&self, record: &AlarmRecord) -> BackendResult<ScheduleHandle> {
        let notification = Self::notification_for(record, Utc::now())?;
        let fire_at = notification.fire_at;
        self.center.post(notification).await?;
        debug!(alarm_id = %record.id, fire_at = %fire_at, "legacy notification posted");
        Ok(ScheduleHandle(format!("legacy:{}", record.id)))
    }

    async fn cancel(&self, id: &AlarmId) -> BackendResult<()> {
        let removed = self.center.remove(id).await?;
        debug!(alarm_id = %id, removed, "legacy notification cancelled");
        Ok(())
    }

    async fn reconcile_list(&self) -> BackendResult<Vec<AlarmId>> {
        let pending = self.center.pending().await?;
        Ok(pending.into_iter().map(|n| n.id).collect())
    }

    async fn export_all(&self) -> BackendResult<Vec<ExportedAlarm>> {
        self.center.export().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fault, InMemoryLegacyCenter, PortOp};
    use alarm_store::{DayOfWeek, SnoozePolicy, SoundRef, Trigger};

    fn record(id: &str) -> AlarmRecord {
        AlarmRecord::new(
            AlarmId::from_string(id),
            Trigger::weekly([DayOfWeek::Mon, DayOfWeek::Thu], 6, 15),
            "Run",
        )
    }

    #[tokio::test]
    async fn weekly_is_armed_as_next_one_shot() {
        let center = Arc::new(InMemoryLegacyCenter::new());
        let adapter = LegacyAdapter::new(center.clone());
        assert!(!adapter.supports_recurrence());

        let r = record("a1");
        adapter.schedule(&r).await.unwrap();
        let pending = center.notification(&r.id).unwrap();
        assert_eq!(Some(pending.fire_at), r.next_fire_after(Utc::now()));
        assert_eq!(pending.title, "Run");
    }

    #[tokio::test]
    async fn rearm_replaces_pending() {
        let center = Arc::new(InMemoryLegacyCenter::new());
        let adapter = LegacyAdapter::new(center.clone());
        let mut r = record("a1");
        adapter.schedule(&r).await.unwrap();
        r.label = "Run faster".to_string();
        adapter.schedule(&r).await.unwrap();

        assert_eq!(adapter.reconcile_list().await.unwrap().len(), 1);
        assert_eq!(center.notification(&r.id).unwrap().title, "Run faster");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let center = Arc::new(InMemoryLegacyCenter::new());
        let adapter = LegacyAdapter::new(center.clone());
        adapter.schedule(&record("a1")).await.unwrap();
        adapter.cancel(&"a1".into()).await.unwrap();
        adapter.cancel(&"a1".into()).await.unwrap();
        assert!(adapter.reconcile_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_returns_seeded_definitions() {
        let center = Arc::new(InMemoryLegacyCenter::new());
        center.seed(ExportedAlarm {
            id: "legacy-1".into(),
            trigger: Trigger::weekly([DayOfWeek::Sun], 10, 0),
            enabled: true,
            label: "Brunch".to_string(),
            content_ref: None,
            sound: SoundRef::default(),
            snooze: SnoozePolicy::default(),
        });
        let adapter = LegacyAdapter::new(center.clone());

        let exported = adapter.export_all().await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].label, "Brunch");
        // Seeded enabled alarms are also pending in the legacy store.
        assert_eq!(adapter.reconcile_list().await.unwrap(), vec![AlarmId::from("legacy-1")]);
    }

    #[tokio::test]
    async fn unavailable_is_reported() {
        let center = Arc::new(InMemoryLegacyCenter::new());
        center.faults().set_sticky(
            PortOp::Schedule,
            Fault::Fail(BackendError::Unavailable("store locked".into())),
        );
        let adapter = LegacyAdapter::new(center);
        let err = adapter.schedule(&record("a1")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_sound_falls_back_to_traditional() {
        let center = Arc::new(InMemoryLegacyCenter::new());
        let adapter = LegacyAdapter::new(center.clone());
        let mut r = record("a1");
        r.sound = SoundRef {
            name: String::new(),
            traditional_fallback: true,
        };
        adapter.schedule(&r).await.unwrap();
        assert_eq!(center.notification(&r.id).unwrap().sound_name, "traditional");
    }
}
