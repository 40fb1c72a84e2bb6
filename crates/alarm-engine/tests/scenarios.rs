//! End-to-end scenarios through the engine facade.

mod common;

use std::sync::Arc;

use alarm_backends::{BackendError, Fault, InMemoryLegacyCenter, InMemoryNativeScheduler, PortOp};
use alarm_engine::{AlarmFilter, SyncEvent, SyncStatus};
use alarm_store::{Affinity, BackendKind};

use common::{id, legacy_alarm, weekly, TestEngine};

/// Scenario A: a new alarm is synced to native and listed there.
#[tokio::test]
async fn scenario_a_create_syncs_to_native() {
    let t = TestEngine::start();

    let created = t.engine.create_alarm(weekly("a1", 7)).unwrap();
    assert_eq!(created.version, 1);
    // Scheduling is asynchronous: the facade returns before any backend call.
    assert!(t.native.is_empty());

    t.sync().await;

    let record = t.engine.get_alarm(&id("a1")).unwrap();
    assert_eq!(record.sync.status, SyncStatus::Synced);
    assert_eq!(record.affinity(), Affinity::Native);
    assert_eq!(record.sync.native.last_synced_version, 1);
    assert!(t.native.contains(&id("a1")));
    assert!(t.legacy.is_empty());
    assert!(t.engine.pending_tasks().unwrap().is_empty());
    t.stop().await;
}

/// Scenario B: native refuses authorization, the alarm falls back to legacy
/// and the user is told once.
#[tokio::test]
async fn scenario_b_native_denied_falls_back_to_legacy() {
    let native = Arc::new(InMemoryNativeScheduler::new());
    native.faults().set_sticky(
        PortOp::Schedule,
        Fault::Fail(BackendError::AuthorizationDenied("alarms not allowed".into())),
    );
    let mut t = TestEngine::with_ports(native, Arc::new(InMemoryLegacyCenter::new()));

    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.sync().await;
    t.sync().await;

    let record = t.engine.get_alarm(&id("a1")).unwrap();
    assert_eq!(record.sync.status, SyncStatus::Synced);
    assert_eq!(record.affinity(), Affinity::Legacy);
    assert!(record.sync.native.block.is_some());
    assert!(t.legacy.contains(&id("a1")));
    assert!(t.native.is_empty());
    // A definitive refusal is not retried.
    assert_eq!(t.native.call_count(PortOp::Schedule, Some(&id("a1"))), 1);

    let errors = t
        .drain_events()
        .into_iter()
        .filter(|e| {
            matches!(e, SyncEvent::UserVisibleError { backend: BackendKind::Native, .. })
        })
        .count();
    assert_eq!(errors, 1);
    t.stop().await;
}

/// Scenario C: deleting an alarm hosted on both backends cancels it on both,
/// then purges the row.
#[tokio::test]
async fn scenario_c_delete_synced_on_both() {
    let legacy = Arc::new(InMemoryLegacyCenter::new());
    legacy.seed(legacy_alarm("L1"));
    // The legacy copy cannot be removed, so the imported alarm stays on both.
    legacy.faults().set_sticky(
        PortOp::Cancel,
        Fault::Fail(BackendError::Unavailable("store busy".into())),
    );
    let t = TestEngine::with_ports(Arc::new(InMemoryNativeScheduler::new()), legacy);
    t.sync().await;

    let record = t.engine.get_alarm(&id("L1")).unwrap();
    assert_eq!(record.affinity(), Affinity::Both);
    assert!(t.native.contains(&id("L1")));
    assert!(t.legacy.contains(&id("L1")));

    t.legacy.faults().clear_sticky(PortOp::Cancel);
    t.engine.delete_alarm(&id("L1")).unwrap();
    // Tombstoned rows are hidden from collaborators at once.
    assert!(t.engine.get_alarm(&id("L1")).is_err());
    assert!(t
        .engine
        .list_alarms(AlarmFilter::default())
        .iter()
        .next()
        .is_none());

    t.sync().await;

    assert!(!t.native.contains(&id("L1")));
    assert!(!t.legacy.contains(&id("L1")));
    assert_eq!(t.native.call_count(PortOp::Cancel, Some(&id("L1"))), 1);
    assert!(t.engine.store().find(&id("L1")).is_none());
    assert!(t.engine.pending_tasks().unwrap().is_empty());
    t.stop().await;
}

/// An alarm refused by both backends stays listed and enabled, degraded.
#[tokio::test]
async fn alarm_failing_everywhere_stays_listed() {
    let native = Arc::new(InMemoryNativeScheduler::new());
    let legacy = Arc::new(InMemoryLegacyCenter::new());
    for faults in [native.faults(), legacy.faults()] {
        faults.set_sticky(
            PortOp::Schedule,
            Fault::Fail(BackendError::AuthorizationDenied("denied".into())),
        );
    }
    let t = TestEngine::with_ports(native, legacy);

    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.sync().await;

    let listed = t.engine.list_alarms(AlarmFilter::default()).to_vec();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].enabled);
    assert_eq!(listed[0].sync.status, SyncStatus::Degraded);
    assert!(listed[0].sync.last_error.is_some());
    t.stop().await;
}

/// Retries that succeed before the limit are invisible to collaborators.
#[tokio::test]
async fn transient_failures_are_retried_quietly() {
    let native = Arc::new(InMemoryNativeScheduler::new());
    native.faults().queue(
        PortOp::Schedule,
        Fault::Fail(BackendError::Unavailable("busy".into())),
    );
    let mut t = TestEngine::with_ports(native, Arc::new(InMemoryLegacyCenter::new()));

    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.sync().await;

    assert_eq!(
        t.engine.get_alarm(&id("a1")).unwrap().sync.status,
        SyncStatus::Synced
    );
    assert_eq!(t.native.call_count(PortOp::Schedule, Some(&id("a1"))), 2);
    assert!(!t.drain_events().iter().any(|e| matches!(
        e,
        SyncEvent::UserVisibleError { .. } | SyncEvent::RetriesExhausted { .. }
    )));
    t.stop().await;
}
