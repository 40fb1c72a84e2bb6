//! One-time import of alarms held only by the legacy store.
//!
//! Imported records keep their legacy ids and start out hosted by legacy
//! with status [`SyncStatus::Migrating`]. Normal planning then creates them
//! on native and cancels the legacy copy once native holds it. The
//! completion flag is persisted after the import, and ids already in the
//! store are skipped, so an interrupted run is safe to repeat.

use std::sync::Arc;

use alarm_backends::ExportedAlarm;
use alarm_store::{AlarmRecord, BackendKind, BackendSync, Origin, SyncStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coordinator::Inner;
use crate::events::SyncEvent;
use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub imported: u64,
    /// Already present, or not importable.
    pub skipped: u64,
}

impl Inner {
    /// Runs the import unless it already completed. Returns `None` if it had.
    pub(crate) async fn migrate_legacy(&self) -> SyncResult<Option<MigrationReport>> {
        if self.store.migration_state()?.completed {
            return Ok(None);
        }

        let legacy = Arc::clone(self.backends.get(BackendKind::Legacy));
        let exported = self
            .timed(BackendKind::Legacy, legacy.export_all())
            .await
            .map_err(|source| SyncError::Backend {
                backend: BackendKind::Legacy,
                source,
            })?;

        let mut report = MigrationReport::default();
        for item in exported {
            if self.store.find(&item.id).is_some() {
                report.skipped += 1;
                continue;
            }
            if let Err(err) = item.trigger.validate() {
                warn!(alarm_id = %item.id, error = %err, "skipping legacy alarm with invalid trigger");
                report.skipped += 1;
                continue;
            }
            self.store.put(imported_record(item))?;
            report.imported += 1;
        }

        if self.store.mark_migration_complete(report.imported)? {
            info!(
                imported = report.imported,
                skipped = report.skipped,
                "legacy migration completed"
            );
            self.publish(SyncEvent::MigrationCompleted {
                imported: report.imported,
                skipped: report.skipped,
            });
        }
        Ok(Some(report))
    }
}

fn imported_record(item: ExportedAlarm) -> AlarmRecord {
    let mut record = AlarmRecord::new(item.id, item.trigger, item.label);
    record.enabled = item.enabled;
    record.content_ref = item.content_ref;
    record.sound = item.sound;
    record.snooze = item.snooze;
    record.origin = Origin::LegacyImport;
    record.sync.legacy = BackendSync {
        affine: item.enabled,
        // The store assigns version 1 on insert; legacy already holds it.
        last_synced_version: 1,
        handle: None,
        block: None,
        armed_until: None,
    };
    record.sync.migrating = true;
    record.sync.status = SyncStatus::Migrating;
    record
}
