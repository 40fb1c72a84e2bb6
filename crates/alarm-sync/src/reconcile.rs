//! Drift reconciliation between the store and what each backend holds.
//!
//! For every backend:
//!
//! - an id the backend lists with no live record behind it is cancelled
//! - an id the backend lists for a record not marked affine is adopted, so
//!   planning either keeps or cancels it
//! - an affine record the backend no longer lists loses its affinity, so
//!   planning schedules it again
//!
//! Pairs with an adapter call in flight are left alone. After the scan,
//! exhausted-retry blocks are lifted and every alarm is replanned.

use std::collections::HashSet;
use std::sync::Arc;

use alarm_store::{AlarmFilter, AlarmId, BackendKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coordinator::Inner;
use crate::events::SyncEvent;
use crate::{SyncError, SyncResult};

/// What one reconciliation pass found on one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub backend: BackendKind,
    /// Expected on the backend but not listed.
    pub missing: usize,
    /// Listed by the backend but not expected there.
    pub orphans: usize,
}

impl DriftReport {
    fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            missing: 0,
            orphans: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.orphans == 0
    }
}

impl Inner {
    pub(crate) async fn reconcile(&self) -> SyncResult<Vec<DriftReport>> {
        for transition in self.health.refresh() {
            self.on_health_transition(transition);
        }

        if let Err(err) = self.migrate_legacy().await {
            warn!(error = %err, "legacy migration deferred");
        }

        let mut reports = Vec::with_capacity(BackendKind::ALL.len());
        for backend in BackendKind::ALL {
            match self.reconcile_backend(backend).await {
                Ok(report) => {
                    if !report.is_clean() {
                        info!(
                            backend = %backend,
                            missing = report.missing,
                            orphans = report.orphans,
                            "backend drift repaired"
                        );
                        self.publish(SyncEvent::DriftRepaired {
                            backend,
                            missing: report.missing,
                            orphans: report.orphans,
                        });
                    }
                    reports.push(report);
                }
                Err(err) => warn!(backend = %backend, error = %err, "drift check skipped"),
            }
        }

        let lifted = self.lift_exhausted()?;
        let planned = self.plan_all();
        info!(planned, lifted, "reconciliation pass complete");
        Ok(reports)
    }

    async fn reconcile_backend(&self, backend: BackendKind) -> SyncResult<DriftReport> {
        let adapter = Arc::clone(self.backends.get(backend));
        let listed: HashSet<AlarmId> = self
            .timed(backend, adapter.reconcile_list())
            .await
            .map_err(|source| SyncError::Backend { backend, source })?
            .into_iter()
            .collect();

        // Until migration finishes, unknown legacy alarms are import candidates.
        let may_cancel_unknown =
            backend != BackendKind::Legacy || self.store.migration_state()?.completed;

        let mut report = DriftReport::new(backend);
        for id in &listed {
            if self.is_pair_in_flight(id, backend) {
                continue;
            }
            match self.store.find(id) {
                None if may_cancel_unknown => {
                    match self.timed(backend, adapter.cancel(id)).await {
                        Ok(()) => report.orphans += 1,
                        Err(err) => {
                            warn!(alarm_id = %id, backend = %backend, error = %err, "orphan cancel failed")
                        }
                    }
                }
                None => {}
                Some(record) if !record.sync.backend(backend).affine => {
                    self.store.update_sync(id, |_, sync| {
                        sync.backend_mut(backend).affine = true;
                    })?;
                    report.orphans += 1;
                }
                Some(_) => {}
            }
        }

        let listing = self.store.list(AlarmFilter::all());
        for record in listing.iter() {
            if !record.sync.backend(backend).affine
                || listed.contains(&record.id)
                || self.is_pair_in_flight(&record.id, backend)
            {
                continue;
            }
            self.store.update_sync(&record.id, |_, sync| {
                let entry = sync.backend_mut(backend);
                entry.affine = false;
                entry.handle = None;
                entry.armed_until = None;
            })?;
            report.missing += 1;
        }

        Ok(report)
    }

    /// Gives exhausted backends a fresh set of attempts.
    fn lift_exhausted(&self) -> SyncResult<usize> {
        let listing = self.store.list(AlarmFilter::all());
        let mut lifted = 0;
        for record in listing.iter().filter(|record| record.sync.is_exhausted()) {
            self.store.update_sync(&record.id, |_, sync| {
                sync.clear_exhausted();
            })?;
            lifted += 1;
        }
        Ok(lifted)
    }
}
