//! Pure planning: which backend should host an alarm, and what work gets it there.
//!
//! # Rules
//!
//! - A tombstoned record is cancelled on both backends, then purged.
//! - A disabled record, or one with no upcoming fire, is cancelled wherever it is affine.
//! - Otherwise exactly one backend is the target. Native is preferred; legacy
//!   takes over when native is blocked for the record or unavailable. A
//!   backend that reads unavailable is never picked as a new target.
//! - A record already synced on a backend stays there while that backend is
//!   unblocked, except that a healthy native reclaims it from legacy.
//! - A non-target backend is cancelled only after the target holds the
//!   current version, so the alarm is never left without a host.
//! - A target without recurrence support is re-armed once the occurrence it
//!   was armed for has passed.

use std::collections::HashMap;

use alarm_health::HealthStatus;
use alarm_store::{AlarmRecord, BackendKind, BlockReason, SyncOp, SyncTask};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Backend that should host the record, if any.
    pub target: Option<BackendKind>,
    /// Tasks to queue at the record's current version.
    pub enqueue: Vec<(BackendKind, SyncOp)>,
    /// Queued tasks that no longer serve a purpose.
    pub drop: Vec<BackendKind>,
    /// Every backend confirmed the delete; the row can go.
    pub purge: bool,
    /// The record should host somewhere but no backend can take it.
    pub stranded: bool,
}

impl Plan {
    pub fn is_settled(&self) -> bool {
        self.enqueue.is_empty() && self.drop.is_empty()
    }
}

/// Builds the plan for `record` given the tasks already queued for it.
pub fn plan<H>(
    record: &AlarmRecord,
    queued: &HashMap<BackendKind, SyncTask>,
    health: H,
    now: DateTime<Utc>,
) -> Plan
where
    H: Fn(BackendKind) -> HealthStatus,
{
    let mut plan = Plan::default();

    if record.pending_delete {
        let mut resolved = true;
        for backend in BackendKind::ALL {
            let sync = record.sync.backend(backend);
            if !sync.affine && sync.last_synced_version >= record.version {
                continue;
            }
            resolved = false;
            if sync.block == Some(BlockReason::RetriesExhausted) {
                continue;
            }
            want(&mut plan, record, queued, backend, SyncOp::Delete);
        }
        plan.purge = resolved && queued.is_empty();
        return plan;
    }

    let schedulable = record.is_live() && record.next_fire_after(now).is_some();
    let target = if schedulable {
        choose_target(record, &health)
    } else {
        None
    };
    plan.target = target;
    plan.stranded = schedulable && target.is_none();

    let hand_off_ready = target.map_or(true, |t| synced_on(record, t));

    for backend in BackendKind::ALL {
        let sync = record.sync.backend(backend);
        if Some(backend) == target {
            if synced_on(record, backend) {
                if sync.needs_rearm(now) {
                    want(&mut plan, record, queued, backend, SyncOp::Update);
                }
                continue;
            }
            let op = if sync.affine {
                SyncOp::Update
            } else {
                SyncOp::Create
            };
            want(&mut plan, record, queued, backend, op);
        } else if sync.affine {
            if hand_off_ready && sync.block != Some(BlockReason::RetriesExhausted) {
                want(&mut plan, record, queued, backend, SyncOp::Delete);
            }
        } else if let Some(task) = queued.get(&backend) {
            if !task.op.is_delete() {
                plan.drop.push(backend);
            }
        }
    }

    plan
}

/// Picks the backend that should host a schedulable record.
pub fn choose_target<H>(record: &AlarmRecord, health: &H) -> Option<BackendKind>
where
    H: Fn(BackendKind) -> HealthStatus,
{
    let blocked = |b: BackendKind| record.sync.backend(b).block.is_some();
    let usable = |b: BackendKind| !blocked(b) && health(b) != HealthStatus::Unavailable;
    let native_healthy = usable(BackendKind::Native) && health(BackendKind::Native) == HealthStatus::Healthy;

    if synced_on(record, BackendKind::Native) && !blocked(BackendKind::Native) {
        return Some(BackendKind::Native);
    }
    if synced_on(record, BackendKind::Legacy) && !blocked(BackendKind::Legacy) && !native_healthy {
        return Some(BackendKind::Legacy);
    }

    match (usable(BackendKind::Native), usable(BackendKind::Legacy)) {
        (true, true) => {
            if health(BackendKind::Native) == HealthStatus::Degraded
                && health(BackendKind::Legacy) == HealthStatus::Healthy
            {
                Some(BackendKind::Legacy)
            } else {
                Some(BackendKind::Native)
            }
        }
        (true, false) => Some(BackendKind::Native),
        (false, true) => Some(BackendKind::Legacy),
        // Stranded until a health transition triggers a replan.
        (false, false) => None,
    }
}

/// The backend hosts the record's current version.
pub fn synced_on(record: &AlarmRecord, backend: BackendKind) -> bool {
    let sync = record.sync.backend(backend);
    sync.affine && sync.last_synced_version >= record.version
}

fn want(
    plan: &mut Plan,
    record: &AlarmRecord,
    queued: &HashMap<BackendKind, SyncTask>,
    backend: BackendKind,
    op: SyncOp,
) {
    // An equivalent task keeps its attempt count and backoff.
    if let Some(task) = queued.get(&backend) {
        if task.op == op && task.target_version >= record.version {
            return;
        }
    }
    plan.enqueue.push((backend, op));
}
