//! SQLite storage layer for the alarm store.
//!
//! SQLite is the only durable store. The in-memory index is rebuilt from it on open.
//! Timestamps are stored as Unix milliseconds and nested values as JSON text.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::migrations::run_migrations;
use crate::types::{
    AlarmId, AlarmRecord, BackendKind, MigrationState, Origin, SyncOp, SyncTask,
};
use crate::{StoreError, StoreResult};

const ALARM_COLUMNS: &str = "id, trigger_json, enabled, label, content_ref, sound_json, \
     snooze_json, snooze_state_json, last_fired_at, version, sync_json, origin, \
     pending_delete, created_at, updated_at";

const TASK_COLUMNS: &str =
    "alarm_id, backend, op, target_version, attempt, next_retry_at, last_error, enqueued_at";

/// SQLite storage for alarms, sync tasks and migration state.
pub struct SqliteStore {
    conn: Connection,
}

/// Raw alarm row before JSON decoding.
struct AlarmRow {
    id: String,
    trigger_json: String,
    enabled: bool,
    label: String,
    content_ref: Option<String>,
    sound_json: String,
    snooze_json: String,
    snooze_state_json: String,
    last_fired_at: Option<i64>,
    version: i64,
    sync_json: String,
    origin: String,
    pending_delete: bool,
    created_at: i64,
    updated_at: i64,
}

impl AlarmRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            trigger_json: row.get(1)?,
            enabled: row.get::<_, i64>(2)? != 0,
            label: row.get(3)?,
            content_ref: row.get(4)?,
            sound_json: row.get(5)?,
            snooze_json: row.get(6)?,
            snooze_state_json: row.get(7)?,
            last_fired_at: row.get(8)?,
            version: row.get(9)?,
            sync_json: row.get(10)?,
            origin: row.get(11)?,
            pending_delete: row.get::<_, i64>(12)? != 0,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_record(self) -> StoreResult<AlarmRecord> {
        Ok(AlarmRecord {
            id: AlarmId(self.id),
            trigger: serde_json::from_str(&self.trigger_json)?,
            enabled: self.enabled,
            label: self.label,
            content_ref: self.content_ref,
            sound: serde_json::from_str(&self.sound_json)?,
            snooze: serde_json::from_str(&self.snooze_json)?,
            snooze_state: serde_json::from_str(&self.snooze_state_json)?,
            last_fired_at: self.last_fired_at.map(from_millis).transpose()?,
            version: u64::try_from(self.version)
                .map_err(|_| StoreError::Corrupt(format!("negative version {}", self.version)))?,
            sync: serde_json::from_str(&self.sync_json)?,
            origin: Origin::from_str(&self.origin),
            pending_delete: self.pending_delete,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

struct TaskRow {
    alarm_id: String,
    backend: String,
    op: String,
    target_version: i64,
    attempt: i64,
    next_retry_at: i64,
    last_error: Option<String>,
    enqueued_at: i64,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            alarm_id: row.get(0)?,
            backend: row.get(1)?,
            op: row.get(2)?,
            target_version: row.get(3)?,
            attempt: row.get(4)?,
            next_retry_at: row.get(5)?,
            last_error: row.get(6)?,
            enqueued_at: row.get(7)?,
        })
    }

    fn into_task(self) -> StoreResult<SyncTask> {
        let backend = BackendKind::from_str(&self.backend)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown backend {}", self.backend)))?;
        Ok(SyncTask {
            alarm_id: AlarmId(self.alarm_id),
            backend,
            op: SyncOp::from_str(&self.op),
            target_version: self.target_version.max(0) as u64,
            attempt: self.attempt.max(0) as u32,
            next_retry_at: from_millis(self.next_retry_at)?,
            last_error: self.last_error,
            enqueued_at: from_millis(self.enqueued_at)?,
        })
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

impl SqliteStore {
    /// Opens a SQLite database at the given path, applying pending migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ========================================================================
    // Alarm operations
    // ========================================================================

    pub fn load_alarms(&self) -> StoreResult<Vec<AlarmRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ALARM_COLUMNS} FROM alarms ORDER BY id"))?;
        let rows = stmt.query_map([], AlarmRow::from_row)?;

        let mut alarms = Vec::new();
        for row in rows {
            alarms.push(row?.into_record()?);
        }
        Ok(alarms)
    }

    pub fn get_alarm(&self, id: &AlarmId) -> StoreResult<Option<AlarmRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = ?1"),
                params![id.as_str()],
                AlarmRow::from_row,
            )
            .optional()?;
        row.map(AlarmRow::into_record).transpose()
    }

    /// Inserts or replaces the full row for `record`.
    pub fn upsert_alarm(&self, record: &AlarmRecord) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO alarms ({ALARM_COLUMNS}, sync_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                record.id.as_str(),
                serde_json::to_string(&record.trigger)?,
                record.enabled as i64,
                record.label,
                record.content_ref,
                serde_json::to_string(&record.sound)?,
                serde_json::to_string(&record.snooze)?,
                serde_json::to_string(&record.snooze_state)?,
                record.last_fired_at.map(to_millis),
                record.version as i64,
                serde_json::to_string(&record.sync)?,
                record.origin.as_str(),
                record.pending_delete as i64,
                to_millis(record.created_at),
                to_millis(record.updated_at),
                record.sync.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Deletes an alarm row and its queued tasks in one transaction.
    ///
    /// Returns true if a row was removed.
    pub fn delete_alarm(&mut self, id: &AlarmId) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM sync_tasks WHERE alarm_id = ?1",
            params![id.as_str()],
        )?;
        let affected = tx.execute("DELETE FROM alarms WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ========================================================================
    // Sync task operations
    // ========================================================================

    /// Inserts a task, replacing any existing task for the same pair.
    pub fn upsert_task(&self, task: &SyncTask) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO sync_tasks ({TASK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                task.alarm_id.as_str(),
                task.backend.as_str(),
                task.op.as_str(),
                task.target_version as i64,
                i64::from(task.attempt),
                to_millis(task.next_retry_at),
                task.last_error,
                to_millis(task.enqueued_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &AlarmId, backend: BackendKind) -> StoreResult<Option<SyncTask>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM sync_tasks WHERE alarm_id = ?1 AND backend = ?2"),
                params![id.as_str(), backend.as_str()],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn tasks_for(&self, id: &AlarmId) -> StoreResult<Vec<SyncTask>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM sync_tasks WHERE alarm_id = ?1 ORDER BY backend"),
            params![id.as_str()],
        )
    }

    /// Tasks whose retry time has passed, oldest due first.
    pub fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SyncTask>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM sync_tasks WHERE next_retry_at <= ?1
                 ORDER BY next_retry_at, enqueued_at LIMIT ?2"
            ),
            params![to_millis(now), limit as i64],
        )
    }

    pub fn all_tasks(&self) -> StoreResult<Vec<SyncTask>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM sync_tasks ORDER BY next_retry_at, alarm_id"),
            [],
        )
    }

    fn query_tasks(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<SyncTask>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, TaskRow::from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }

    /// Removes the task for the pair unconditionally.
    pub fn delete_task(&self, id: &AlarmId, backend: BackendKind) -> StoreResult<bool> {
        let affected = self.conn.execute(
            "DELETE FROM sync_tasks WHERE alarm_id = ?1 AND backend = ?2",
            params![id.as_str(), backend.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Removes the task only if it still targets `target_version` or older.
    ///
    /// A superseding task with a newer target survives.
    pub fn delete_task_up_to(
        &self,
        id: &AlarmId,
        backend: BackendKind,
        target_version: u64,
    ) -> StoreResult<bool> {
        let affected = self.conn.execute(
            "DELETE FROM sync_tasks WHERE alarm_id = ?1 AND backend = ?2 AND target_version <= ?3",
            params![id.as_str(), backend.as_str(), target_version as i64],
        )?;
        Ok(affected > 0)
    }

    // ========================================================================
    // Migration state
    // ========================================================================

    pub fn migration_state(&self) -> StoreResult<MigrationState> {
        let (completed, completed_at, imported): (i64, Option<i64>, i64) = self.conn.query_row(
            "SELECT completed, completed_at, imported FROM migration_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(MigrationState {
            completed: completed != 0,
            completed_at: completed_at.map(from_millis).transpose()?,
            imported: imported.max(0) as u64,
        })
    }

    /// Sets the completion flag. Returns false if it was already set.
    pub fn mark_migration_complete(&self, imported: u64, at: DateTime<Utc>) -> StoreResult<bool> {
        let affected = self.conn.execute(
            "UPDATE migration_state SET completed = 1, completed_at = ?1, imported = ?2
             WHERE id = 1 AND completed = 0",
            params![to_millis(at), imported as i64],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{DayOfWeek, Trigger};

    fn record(id: &str) -> AlarmRecord {
        let mut r = AlarmRecord::new(
            AlarmId::from_string(id),
            Trigger::weekly([DayOfWeek::Tue, DayOfWeek::Thu], 6, 45),
            "Gym",
        );
        r.version = 1;
        r
    }

    #[test]
    fn alarm_row_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut r = record("a1");
        r.content_ref = Some("content/a1.json".to_string());
        r.sync.native.affine = true;
        r.sync.native.handle = Some("h-1".to_string());
        store.upsert_alarm(&r).unwrap();

        let loaded = store.get_alarm(&r.id).unwrap().unwrap();
        assert_eq!(loaded.trigger, r.trigger);
        assert_eq!(loaded.content_ref, r.content_ref);
        assert_eq!(loaded.sync, r.sync);
        assert_eq!(loaded.created_at.timestamp_millis(), r.created_at.timestamp_millis());
    }

    #[test]
    fn delete_alarm_removes_tasks() {
        let mut store = SqliteStore::in_memory().unwrap();
        let r = record("a1");
        store.upsert_alarm(&r).unwrap();
        store
            .upsert_task(&SyncTask::new(r.id.clone(), BackendKind::Native, SyncOp::Create, 1))
            .unwrap();

        assert!(store.delete_alarm(&r.id).unwrap());
        assert!(store.get_alarm(&r.id).unwrap().is_none());
        assert!(store.tasks_for(&r.id).unwrap().is_empty());
        assert!(!store.delete_alarm(&r.id).unwrap());
    }

    #[test]
    fn upsert_task_replaces_pair() {
        let store = SqliteStore::in_memory().unwrap();
        let id = AlarmId::from_string("a1");
        store
            .upsert_task(&SyncTask::new(id.clone(), BackendKind::Native, SyncOp::Create, 1))
            .unwrap();
        store
            .upsert_task(&SyncTask::new(id.clone(), BackendKind::Native, SyncOp::Update, 2))
            .unwrap();

        let tasks = store.tasks_for(&id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].op, SyncOp::Update);
        assert_eq!(tasks[0].target_version, 2);
    }

    #[test]
    fn delete_task_up_to_keeps_newer() {
        let store = SqliteStore::in_memory().unwrap();
        let id = AlarmId::from_string("a1");
        store
            .upsert_task(&SyncTask::new(id.clone(), BackendKind::Legacy, SyncOp::Update, 3))
            .unwrap();
        assert!(!store.delete_task_up_to(&id, BackendKind::Legacy, 2).unwrap());
        assert!(store.delete_task_up_to(&id, BackendKind::Legacy, 3).unwrap());
    }

    #[test]
    fn migration_flag_sets_once() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.migration_state().unwrap().completed);
        assert!(store.mark_migration_complete(4, Utc::now()).unwrap());
        assert!(!store.mark_migration_complete(9, Utc::now()).unwrap());
        let state = store.migration_state().unwrap();
        assert!(state.completed);
        assert_eq!(state.imported, 4);
    }
}
