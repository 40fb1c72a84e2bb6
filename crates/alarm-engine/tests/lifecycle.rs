//! Facade operations: validation, toggling, snooze, dismiss and fire.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alarm_backends::{BackendError, Fault, InMemoryLegacyCenter, InMemoryNativeScheduler, PortOp};
use alarm_engine::{AlarmPatch, AlarmSpec, EngineError, SnoozePolicy, SyncStatus, Trigger};
use chrono::Utc;

use common::{id, weekly, TestEngine};

#[tokio::test]
async fn create_rejects_invalid_requests_before_the_store() {
    let t = TestEngine::start();

    let past = AlarmSpec::new(
        Trigger::Once {
            at: Utc::now() - chrono::Duration::minutes(5),
        },
        "too late",
    );
    assert!(matches!(
        t.engine.create_alarm(past),
        Err(EngineError::Validation(_))
    ));
    let bad_hour = AlarmSpec::new(Trigger::weekly(alarm_engine::DayOfWeek::ALL, 24, 0), "x");
    assert!(matches!(
        t.engine.create_alarm(bad_hour),
        Err(EngineError::Validation(_))
    ));
    assert!(t.engine.store().is_empty());

    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    assert!(matches!(
        t.engine.create_alarm(weekly("a1", 8)),
        Err(EngineError::AlreadyExists(_))
    ));
    t.stop().await;
}

#[tokio::test]
async fn generated_ids_are_unique() {
    let t = TestEngine::start();
    let spec = AlarmSpec::new(Trigger::weekly(alarm_engine::DayOfWeek::ALL, 6, 0), "daily");
    let a = t.engine.create_alarm(spec.clone()).unwrap();
    let b = t.engine.create_alarm(spec).unwrap();
    assert_ne!(a.id, b.id);
    t.stop().await;
}

#[tokio::test]
async fn update_bumps_version_and_reschedules() {
    let t = TestEngine::start();
    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.sync().await;

    let updated = t
        .engine
        .update_alarm(&id("a1"), AlarmPatch::label("Gym"))
        .unwrap();
    assert_eq!(updated.version, 2);
    t.sync().await;

    assert_eq!(t.native.request_for(&id("a1")).unwrap().label, "Gym");
    let record = t.engine.get_alarm(&id("a1")).unwrap();
    assert_eq!(record.sync.native.last_synced_version, 2);

    // An empty patch changes nothing.
    let same = t.engine.update_alarm(&id("a1"), AlarmPatch::default()).unwrap();
    assert_eq!(same.version, 2);
    t.stop().await;
}

#[tokio::test]
async fn operations_on_deleted_alarm_are_not_found() {
    let t = TestEngine::start();
    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.engine.delete_alarm(&id("a1")).unwrap();
    // Repeating the delete is harmless.
    t.engine.delete_alarm(&id("a1")).unwrap();

    assert!(matches!(
        t.engine.update_alarm(&id("a1"), AlarmPatch::label("x")),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        t.engine.snooze(&id("a1"), None),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        t.engine.toggle_enabled(&id("nope"), true),
        Err(EngineError::NotFound(_))
    ));
    t.stop().await;
}

#[tokio::test]
async fn toggle_off_cancels_and_keeps_the_row() {
    let t = TestEngine::start();
    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.sync().await;
    assert!(t.native.contains(&id("a1")));

    t.engine.toggle_enabled(&id("a1"), false).unwrap();
    t.sync().await;
    assert!(!t.native.contains(&id("a1")));
    let record = t.engine.get_alarm(&id("a1")).unwrap();
    assert!(!record.enabled);
    assert_eq!(record.sync.status, SyncStatus::Synced);

    t.engine.toggle_enabled(&id("a1"), true).unwrap();
    t.sync().await;
    assert!(t.native.contains(&id("a1")));
    t.stop().await;
}

#[tokio::test]
async fn enabling_an_elapsed_one_shot_is_rejected() {
    let t = TestEngine::start();
    let at = Utc::now() + chrono::Duration::milliseconds(50);
    t.engine
        .create_alarm(AlarmSpec::new(Trigger::Once { at }, "soon").with_id("o1"))
        .unwrap();
    t.engine.toggle_enabled(&id("o1"), false).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(matches!(
        t.engine.toggle_enabled(&id("o1"), true),
        Err(EngineError::Validation(_))
    ));
    t.stop().await;
}

#[tokio::test]
async fn snooze_is_bounded_by_policy() {
    let t = TestEngine::start();
    t.engine
        .create_alarm(weekly("a1", 7).with_snooze(SnoozePolicy {
            duration_secs: 300,
            max_count: 2,
        }))
        .unwrap();

    let before = Utc::now();
    let first = t.engine.snooze(&id("a1"), None).unwrap();
    let until = first.snooze_state.snoozed_until.unwrap();
    assert!(until >= before + chrono::Duration::seconds(300));
    assert_eq!(first.snooze_state.count, 1);

    let second = t
        .engine
        .snooze(&id("a1"), Some(Duration::from_secs(60)))
        .unwrap();
    assert_eq!(second.snooze_state.count, 2);

    assert!(matches!(
        t.engine.snooze(&id("a1"), None),
        Err(EngineError::Validation(_))
    ));

    // The native request carries the snooze override.
    t.sync().await;
    assert_eq!(
        t.native.request_for(&id("a1")).unwrap().snoozed_until,
        second.snooze_state.snoozed_until
    );
    t.stop().await;
}

#[tokio::test]
async fn snoozing_a_disabled_alarm_is_rejected() {
    let t = TestEngine::start();
    t.engine.create_alarm(weekly("a1", 7).disabled()).unwrap();
    assert!(matches!(
        t.engine.snooze(&id("a1"), None),
        Err(EngineError::Validation(_))
    ));
    t.stop().await;
}

#[tokio::test]
async fn dismiss_clears_snooze_and_disables_one_shots() {
    let t = TestEngine::start();
    t.engine.create_alarm(weekly("w1", 7)).unwrap();
    t.engine
        .create_alarm(
            AlarmSpec::new(
                Trigger::Once {
                    at: Utc::now() + chrono::Duration::hours(2),
                },
                "dentist",
            )
            .with_id("o1"),
        )
        .unwrap();
    t.engine.snooze(&id("w1"), None).unwrap();

    let weekly = t.engine.dismiss(&id("w1")).unwrap();
    assert!(weekly.enabled);
    assert_eq!(weekly.snooze_state.count, 0);
    assert_eq!(weekly.snooze_state.snoozed_until, None);

    let once = t.engine.dismiss(&id("o1")).unwrap();
    assert!(!once.enabled);
    t.stop().await;
}

/// Firing a weekly alarm hosted on legacy re-arms it for the next occurrence.
#[tokio::test]
async fn fire_rearms_legacy_hosted_alarm() {
    let native = Arc::new(InMemoryNativeScheduler::new());
    native.faults().set_sticky(
        PortOp::Schedule,
        Fault::Fail(BackendError::AuthorizationDenied("denied".into())),
    );
    let t = TestEngine::with_ports(native, Arc::new(InMemoryLegacyCenter::new()));
    t.engine.create_alarm(weekly("a1", 7)).unwrap();
    t.sync().await;
    assert_eq!(t.legacy.call_count(PortOp::Schedule, Some(&id("a1"))), 1);

    let fired = t.engine.fire(&id("a1")).unwrap();
    assert!(fired.last_fired_at.is_some());
    assert_eq!(fired.version, 2);
    t.sync().await;

    assert_eq!(t.legacy.call_count(PortOp::Schedule, Some(&id("a1"))), 2);
    assert!(t.legacy.contains(&id("a1")));
    let record = t.engine.get_alarm(&id("a1")).unwrap();
    assert_eq!(record.sync.legacy.last_synced_version, 2);
    assert_eq!(record.sync.status, SyncStatus::Synced);
    t.stop().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_stops_sync() {
    let t = TestEngine::start();
    t.engine.shutdown().await.unwrap();
    t.engine.shutdown().await.unwrap();
    assert!(matches!(t.engine.sync_now().await, Err(EngineError::Sync(_))));
}
