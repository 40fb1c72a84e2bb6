//! Rule-style tests for the alarm store.
//!
//! - `durability.rs`  - Rules 1-8 (SQLite & Recovery)
//! - `versioning.rs`  - Rules 9-18 (Versions & Conflicts)
//! - `changes.rs`     - Rules 19-26 (Change Emission)
//! - `listing.rs`     - Rules 27-32 (Listing Order & Filters)
//! - `tasks.rs`       - Rules 33-40 (Task Queue & Migration Flag)
//! - `concurrency.rs` - Rules 41-44 (Concurrency & Isolation)

mod tasks;

use chrono::{DateTime, Duration, Utc};

use crate::trigger::{DayOfWeek, Trigger};
use crate::types::{AlarmId, AlarmRecord};
use crate::{AlarmStore, RecordingSink};

pub(crate) fn weekly(id: &str, hour: u8) -> AlarmRecord {
    AlarmRecord::new(
        AlarmId::from_string(id),
        Trigger::weekly(DayOfWeek::ALL, hour, 0),
        format!("alarm {id}"),
    )
}

pub(crate) fn once_in(id: &str, from: DateTime<Utc>, minutes: i64) -> AlarmRecord {
    AlarmRecord::new(
        AlarmId::from_string(id),
        Trigger::Once {
            at: from + Duration::minutes(minutes),
        },
        format!("alarm {id}"),
    )
}

pub(crate) fn store() -> AlarmStore<RecordingSink> {
    AlarmStore::in_memory(RecordingSink::new()).unwrap()
}

/// Basic workflow: create, edit, tombstone, purge.
#[test]
fn basic_workflow() {
    let store = store();

    let created = store.put(weekly("a1", 7)).unwrap();
    assert_eq!(created.version, 1);

    let edited = store
        .update(&created.id, |r| {
            r.label = "Wake up".to_string();
            Ok::<_, crate::StoreError>(())
        })
        .unwrap();
    assert_eq!(edited.version, 2);

    let tombstoned = store.mark_pending_delete(&created.id).unwrap();
    assert!(tombstoned.pending_delete);
    assert!(!tombstoned.enabled);

    let last = store.delete(&created.id).unwrap();
    assert_eq!(last.version, 3);
    assert!(store.is_empty());
    assert_eq!(store.sink().len(), 4);
}
