//! Task queue and migration flag.
//!
//! Rules covered:
//! - 33. At most one task per (alarm, backend)
//! - 34. A newer task supersedes an older one
//! - 35. An older task never replaces a newer one
//! - 36. Due tasks respect next_retry_at and the batch limit
//! - 37. Completion only removes tasks at or below the target version
//! - 38. Rescheduling a superseded task is refused
//! - 39. Tasks cannot be queued for unknown alarms
//! - 40. The migration flag is set exactly once

use chrono::{Duration, Utc};

use super::weekly;
use crate::types::{BackendKind, SyncOp, SyncTask};
use crate::StoreError;

fn task(id: &str, backend: BackendKind, op: SyncOp, version: u64) -> SyncTask {
    SyncTask::new(id.into(), backend, op, version)
}

/// Rule 33: At most one task per (alarm, backend)
#[test]
fn rule_33_one_task_per_pair() {
    let store = super::store();
    store.put(weekly("a1", 6)).unwrap();
    assert!(store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Create, 1)).unwrap());
    assert!(store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Create, 1)).unwrap());
    assert!(store.upsert_task(&task("a1", BackendKind::Legacy, SyncOp::Create, 1)).unwrap());
    assert_eq!(store.tasks_for(&"a1".into()).unwrap().len(), 2);
}

/// Rule 34: A newer task supersedes an older one
#[test]
fn rule_34_newer_supersedes() {
    let store = super::store();
    store.put(weekly("a1", 6)).unwrap();
    store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Create, 1)).unwrap();
    store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Delete, 2)).unwrap();

    let tasks = store.tasks_for(&"a1".into()).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].op, SyncOp::Delete);
    assert_eq!(tasks[0].target_version, 2);
}

/// Rule 35: An older task never replaces a newer one
#[test]
fn rule_35_older_does_not_replace() {
    let store = super::store();
    store.put(weekly("a1", 6)).unwrap();
    store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Update, 3)).unwrap();
    assert!(!store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Create, 2)).unwrap());
    assert_eq!(store.tasks_for(&"a1".into()).unwrap()[0].target_version, 3);
}

/// Rule 36: Due tasks respect next_retry_at and the batch limit
#[test]
fn rule_36_due_tasks() {
    let store = super::store();
    let now = Utc::now();
    for i in 0..4 {
        let id = format!("a{i}");
        store.put(weekly(&id, 6)).unwrap();
        let mut t = task(&id, BackendKind::Native, SyncOp::Create, 1);
        t.next_retry_at = now - Duration::seconds(10 - i);
        store.upsert_task(&t).unwrap();
    }
    store.put(weekly("later", 6)).unwrap();
    let mut later = task("later", BackendKind::Native, SyncOp::Create, 1);
    later.next_retry_at = now + Duration::minutes(5);
    store.upsert_task(&later).unwrap();

    let due = store.due_tasks(now, 3).unwrap();
    let ids: Vec<_> = due.iter().map(|t| t.alarm_id.to_string()).collect();
    assert_eq!(ids, vec!["a0", "a1", "a2"]);
    assert_eq!(store.due_tasks(now, 10).unwrap().len(), 4);
}

/// Rule 37: Completion only removes tasks at or below the target version
#[test]
fn rule_37_completion_respects_version() {
    let store = super::store();
    store.put(weekly("a1", 6)).unwrap();
    store.upsert_task(&task("a1", BackendKind::Legacy, SyncOp::Update, 4)).unwrap();

    assert!(!store.complete_task(&"a1".into(), BackendKind::Legacy, 3).unwrap());
    assert_eq!(store.tasks_for(&"a1".into()).unwrap().len(), 1);
    assert!(store.complete_task(&"a1".into(), BackendKind::Legacy, 4).unwrap());
    assert!(store.tasks_for(&"a1".into()).unwrap().is_empty());
}

/// Rule 38: Rescheduling a superseded task is refused
#[test]
fn rule_38_reschedule_superseded() {
    let store = super::store();
    store.put(weekly("a1", 6)).unwrap();
    let original = task("a1", BackendKind::Native, SyncOp::Create, 1);
    store.upsert_task(&original).unwrap();
    store.upsert_task(&task("a1", BackendKind::Native, SyncOp::Update, 2)).unwrap();

    let mut retry = original.clone();
    retry.attempt = 1;
    retry.last_error = Some("unavailable".to_string());
    assert!(!store.reschedule_task(&retry).unwrap());

    let mut current = store.tasks_for(&"a1".into()).unwrap().remove(0);
    current.attempt = 1;
    assert!(store.reschedule_task(&current).unwrap());
    assert_eq!(store.tasks_for(&"a1".into()).unwrap()[0].attempt, 1);
}

/// Rule 39: Tasks cannot be queued for unknown alarms
#[test]
fn rule_39_task_requires_alarm() {
    let store = super::store();
    let err = store
        .upsert_task(&task("ghost", BackendKind::Native, SyncOp::Create, 1))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

/// Rule 40: The migration flag is set exactly once
#[test]
fn rule_40_migration_flag_once() {
    let store = super::store();
    assert!(!store.migration_state().unwrap().completed);
    assert!(store.mark_migration_complete(2).unwrap());
    assert!(!store.mark_migration_complete(5).unwrap());
    assert_eq!(store.migration_state().unwrap().imported, 2);
}
