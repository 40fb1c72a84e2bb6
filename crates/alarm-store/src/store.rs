//! The alarm store: durable records, a derived read index, and change notifications.
//!
//! # Write Path (strict order)
//!
//! 1. Commit to SQLite
//! 2. Swap the record in the in-memory index
//! 3. Emit a [`StoreChange`]
//!
//! If step 1 fails, nothing else runs.
//!
//! # Recovery (silent)
//!
//! On open the index is rebuilt from SQLite. Recovery emits no changes.
//!
//! Writes for one alarm are serialized by a per-id lock. Readers never take
//! that lock; they see either the old or the new record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::change::{ChangeSink, StoreChange};
use crate::locks::KeyedLocks;
use crate::sqlite::SqliteStore;
use crate::types::{
    AlarmFilter, AlarmId, AlarmRecord, BackendKind, MigrationState, SyncMeta, SyncStatus,
    SyncTask,
};
use crate::{StoreError, StoreResult};

pub struct AlarmStore<S: ChangeSink> {
    sqlite: Mutex<SqliteStore>,
    index: RwLock<HashMap<AlarmId, Arc<AlarmRecord>>>,
    locks: KeyedLocks<AlarmId>,
    sink: Arc<S>,
}

impl<S: ChangeSink> AlarmStore<S> {
    /// Opens the store at `path`, running migrations and rebuilding the index.
    pub fn open(path: impl AsRef<Path>, sink: S) -> StoreResult<Self> {
        let sqlite = SqliteStore::open(path)?;
        Self::from_sqlite(sqlite, sink)
    }

    /// Creates a store backed by an in-memory database.
    pub fn in_memory(sink: S) -> StoreResult<Self> {
        let sqlite = SqliteStore::in_memory()?;
        Self::from_sqlite(sqlite, sink)
    }

    fn from_sqlite(sqlite: SqliteStore, sink: S) -> StoreResult<Self> {
        let store = Self {
            sqlite: Mutex::new(sqlite),
            index: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            sink: Arc::new(sink),
        };
        store.recover()?;
        Ok(store)
    }

    fn recover(&self) -> StoreResult<()> {
        let alarms = self.sqlite.lock().load_alarms()?;
        let count = alarms.len();
        let index = alarms
            .into_iter()
            .map(|record| (record.id.clone(), Arc::new(record)))
            .collect();
        *self.index.write() = index;
        info!(alarms = count, "alarm store recovered from SQLite");
        Ok(())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, id: &AlarmId) -> StoreResult<Arc<AlarmRecord>> {
        self.find(id).ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn find(&self, id: &AlarmId) -> Option<Arc<AlarmRecord>> {
        self.index.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot listing ordered by next fire time, then id.
    ///
    /// Alarms with no upcoming fire sort last. The listing is evaluated
    /// lazily against `filter` and can be iterated more than once.
    pub fn list(&self, filter: AlarmFilter) -> AlarmListing {
        let now = filter.now.unwrap_or_else(Utc::now);
        let mut entries: Vec<(Option<DateTime<Utc>>, Arc<AlarmRecord>)> = self
            .index
            .read()
            .values()
            .map(|record| (record.next_fire_after(now), Arc::clone(record)))
            .collect();
        entries.sort_by(|(a_time, a), (b_time, b)| {
            let a_key = (a_time.is_none(), *a_time);
            let b_key = (b_time.is_none(), *b_time);
            a_key.cmp(&b_key).then_with(|| a.id.cmp(&b.id))
        });
        AlarmListing { entries, filter }
    }

    // ========================================================================
    // Content writes (bump version, emit changes)
    // ========================================================================

    /// Inserts a new record (version 0) or replaces an existing one.
    ///
    /// Replacing requires `record.version` to equal the stored version.
    /// The version is bumped only if content changed; sync metadata, origin and
    /// creation time of the stored record are preserved.
    pub fn put(&self, record: AlarmRecord) -> StoreResult<Arc<AlarmRecord>> {
        let _guard = self.locks.lock(&record.id);
        let stored = self.find(&record.id);
        let found = stored.as_ref().map_or(0, |s| s.version);
        if record.version != found {
            return Err(StoreError::VersionConflict {
                id: record.id.clone(),
                expected: record.version,
                found,
            });
        }
        self.write_content(stored, record)
    }

    /// Atomic read-modify-write of user content.
    pub fn update<F, E>(&self, id: &AlarmId, f: F) -> Result<Arc<AlarmRecord>, E>
    where
        F: FnOnce(&mut AlarmRecord) -> Result<(), E>,
        E: From<StoreError>,
    {
        let _guard = self.locks.lock(id);
        let stored = self.get(id)?;
        let mut record = (*stored).clone();
        f(&mut record)?;
        record.id = stored.id.clone();
        Ok(self.write_content(Some(stored), record)?)
    }

    /// Tombstones a record so the coordinator can cancel it on every backend.
    ///
    /// The record is disabled and hidden from default listings; it is purged by
    /// [`AlarmStore::delete`] once all cancels resolve.
    pub fn mark_pending_delete(&self, id: &AlarmId) -> StoreResult<Arc<AlarmRecord>> {
        self.update(id, |record| {
            record.pending_delete = true;
            record.enabled = false;
            Ok::<_, StoreError>(())
        })
    }

    /// Removes the row and its queued tasks, returning the last record.
    pub fn delete(&self, id: &AlarmId) -> StoreResult<AlarmRecord> {
        let _guard = self.locks.lock(id);
        let stored = self.get(id)?;
        self.sqlite.lock().delete_alarm(id)?;
        self.index.write().remove(id);
        debug!(alarm_id = %id, version = stored.version, "alarm purged");
        self.sink.emit(StoreChange::Purged { id: id.clone() });
        Ok((*stored).clone())
    }

    fn write_content(
        &self,
        stored: Option<Arc<AlarmRecord>>,
        mut record: AlarmRecord,
    ) -> StoreResult<Arc<AlarmRecord>> {
        let now = Utc::now();
        let change = match stored {
            None => {
                record.version = 1;
                record.created_at = now;
                record.updated_at = now;
                StoreChange::Created {
                    id: record.id.clone(),
                    version: 1,
                }
            }
            Some(stored) => {
                if stored.content_eq(&record) {
                    return Ok(stored);
                }
                let tombstoned = record.pending_delete && !stored.pending_delete;
                record.version = stored.version + 1;
                record.sync = stored.sync.clone();
                record.sync.clear_blocks();
                record.sync.last_error = None;
                if record.sync.status != SyncStatus::Migrating {
                    record.sync.status = SyncStatus::Unsynced;
                }
                record.origin = stored.origin;
                record.created_at = stored.created_at;
                record.updated_at = now;
                if tombstoned {
                    StoreChange::DeleteRequested {
                        id: record.id.clone(),
                        version: record.version,
                    }
                } else {
                    StoreChange::Updated {
                        id: record.id.clone(),
                        version: record.version,
                    }
                }
            }
        };

        self.sqlite.lock().upsert_alarm(&record)?;
        let record = Arc::new(record);
        self.index
            .write()
            .insert(record.id.clone(), Arc::clone(&record));
        debug!(alarm_id = %record.id, version = record.version, "alarm committed");
        self.sink.emit(change);
        Ok(record)
    }

    // ========================================================================
    // Sync metadata writes (no version bump, no change emitted)
    // ========================================================================

    /// Atomic update of coordinator-owned sync metadata.
    ///
    /// `f` sees the current record and edits a copy of its metadata. Nothing is
    /// written if the metadata is unchanged.
    pub fn update_sync<F>(&self, id: &AlarmId, f: F) -> StoreResult<Arc<AlarmRecord>>
    where
        F: FnOnce(&AlarmRecord, &mut SyncMeta),
    {
        let _guard = self.locks.lock(id);
        let stored = self.get(id)?;
        let mut sync = stored.sync.clone();
        f(&stored, &mut sync);
        if sync == stored.sync {
            return Ok(stored);
        }

        let mut record = (*stored).clone();
        record.sync = sync;
        self.sqlite.lock().upsert_alarm(&record)?;
        let record = Arc::new(record);
        self.index
            .write()
            .insert(record.id.clone(), Arc::clone(&record));
        Ok(record)
    }

    // ========================================================================
    // Task queue
    // ========================================================================

    /// Queues `task`, superseding an older task for the same pair.
    ///
    /// Returns false if a task with a newer target version is already queued.
    pub fn upsert_task(&self, task: &SyncTask) -> StoreResult<bool> {
        if self.find(&task.alarm_id).is_none() {
            return Err(StoreError::NotFound(task.alarm_id.clone()));
        }
        let sqlite = self.sqlite.lock();
        if let Some(existing) = sqlite.get_task(&task.alarm_id, task.backend)? {
            if existing.target_version > task.target_version {
                return Ok(false);
            }
        }
        sqlite.upsert_task(task)?;
        Ok(true)
    }

    pub fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SyncTask>> {
        self.sqlite.lock().due_tasks(now, limit)
    }

    pub fn tasks_for(&self, id: &AlarmId) -> StoreResult<Vec<SyncTask>> {
        self.sqlite.lock().tasks_for(id)
    }

    pub fn all_tasks(&self) -> StoreResult<Vec<SyncTask>> {
        self.sqlite.lock().all_tasks()
    }

    /// Removes the pair's task if it targets `target_version` or older.
    pub fn complete_task(
        &self,
        id: &AlarmId,
        backend: BackendKind,
        target_version: u64,
    ) -> StoreResult<bool> {
        self.sqlite
            .lock()
            .delete_task_up_to(id, backend, target_version)
    }

    /// Persists retry bookkeeping for `task`.
    ///
    /// Returns false if the task was superseded or removed meanwhile.
    pub fn reschedule_task(&self, task: &SyncTask) -> StoreResult<bool> {
        let sqlite = self.sqlite.lock();
        match sqlite.get_task(&task.alarm_id, task.backend)? {
            Some(existing)
                if existing.target_version == task.target_version && existing.op == task.op =>
            {
                sqlite.upsert_task(task)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn drop_task(&self, id: &AlarmId, backend: BackendKind) -> StoreResult<bool> {
        self.sqlite.lock().delete_task(id, backend)
    }

    // ========================================================================
    // Migration flag
    // ========================================================================

    pub fn migration_state(&self) -> StoreResult<MigrationState> {
        self.sqlite.lock().migration_state()
    }

    /// Marks the one-time legacy migration as done. Returns false if already done.
    pub fn mark_migration_complete(&self, imported: u64) -> StoreResult<bool> {
        self.sqlite
            .lock()
            .mark_migration_complete(imported, Utc::now())
    }
}

/// A point-in-time listing of alarms.
pub struct AlarmListing {
    entries: Vec<(Option<DateTime<Utc>>, Arc<AlarmRecord>)>,
    filter: AlarmFilter,
}

impl AlarmListing {
    /// Iterates matching records from the start.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AlarmRecord>> + '_ {
        self.entries
            .iter()
            .map(|(_, record)| record)
            .filter(|record| self.filter.matches(record))
    }

    /// Iterates matching records paired with their next fire time.
    pub fn iter_with_next_fire(
        &self,
    ) -> impl Iterator<Item = (Option<DateTime<Utc>>, &Arc<AlarmRecord>)> + '_ {
        self.entries
            .iter()
            .filter(|(_, record)| self.filter.matches(record))
            .map(|(next, record)| (*next, record))
    }

    pub fn to_vec(&self) -> Vec<Arc<AlarmRecord>> {
        self.iter().cloned().collect()
    }
}
