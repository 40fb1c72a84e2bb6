//! The engine facade.
//!
//! Owns the store, cache, health monitor and sync coordinator, and is the
//! only thing collaborators talk to. Mutations commit to the store and
//! return; backend scheduling happens on the coordinator and is observable
//! through `record.sync.status` and [`AlarmEngine::subscribe`].

use std::sync::Arc;

use alarm_backends::{LegacyAdapter, LegacyNotificationCenter, NativeAdapter, NativeScheduler};
use alarm_cache::{derive, CacheStats, DerivedAlarm, DerivedCache, RecordSource};
use alarm_health::{BackendHealth, HealthMonitor};
use alarm_store::{
    AlarmFilter, AlarmId, AlarmListing, AlarmRecord, AlarmStore, MigrationState, SnoozeState,
    StoreError, SyncTask, Trigger,
};
use alarm_sync::{
    Backends, ChangeFeed, ChangeStream, Coordinator, CoordinatorHandle, DriftReport, SyncEvent,
    SyncedStore,
};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::request::{validate_trigger, AlarmPatch, AlarmSpec};
use crate::{EngineConfig, EngineError, EngineResult, Paths};

/// The two platform ports the engine schedules through.
#[derive(Clone)]
pub struct EnginePorts {
    pub native: Arc<dyn NativeScheduler>,
    pub legacy: Arc<dyn LegacyNotificationCenter>,
}

pub struct AlarmEngine {
    store: Arc<SyncedStore>,
    cache: Arc<DerivedCache>,
    health: Arc<HealthMonitor>,
    sync: CoordinatorHandle,
}

impl AlarmEngine {
    /// Opens the engine on the database under `paths` and starts the
    /// coordinator on the current Tokio runtime.
    pub fn open(paths: &Paths, config: &EngineConfig, ports: EnginePorts) -> EngineResult<Self> {
        config.validate()?;
        paths.ensure_dirs()?;
        let (feed, stream) = ChangeFeed::channel(config.change_queue_capacity);
        let store = AlarmStore::open(paths.database_file(), feed)?;
        info!(database = %paths.database_file().display(), alarms = store.len(), "alarm store opened");
        Self::start(store, stream, config, ports)
    }

    /// Starts the engine on a throwaway in-memory database.
    pub fn in_memory(config: &EngineConfig, ports: EnginePorts) -> EngineResult<Self> {
        config.validate()?;
        let (feed, stream) = ChangeFeed::channel(config.change_queue_capacity);
        let store = AlarmStore::in_memory(feed)?;
        Self::start(store, stream, config, ports)
    }

    fn start(
        store: SyncedStore,
        stream: ChangeStream,
        config: &EngineConfig,
        ports: EnginePorts,
    ) -> EngineResult<Self> {
        let store = Arc::new(store);
        let source: Arc<dyn RecordSource> = store.clone();
        let cache = Arc::new(DerivedCache::new(config.cache_capacity, source)?);
        let health = Arc::new(HealthMonitor::new(config.health_config())?);
        let backends = Backends {
            native: Arc::new(NativeAdapter::new(ports.native)),
            legacy: Arc::new(LegacyAdapter::new(ports.legacy)),
        };

        let coordinator = Coordinator::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            backends,
            Arc::clone(&health),
            config.sync_config(),
            stream,
        )?;
        let sync = coordinator.start()?;

        Ok(Self {
            store,
            cache,
            health,
            sync,
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn create_alarm(&self, spec: AlarmSpec) -> EngineResult<Arc<AlarmRecord>> {
        spec.validate(Utc::now())?;
        let record = spec.into_record();
        let id = record.id.clone();
        if self.store.find(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let stored = self.store.put(record).map_err(|err| match err {
            StoreError::VersionConflict { id, .. } => EngineError::AlreadyExists(id),
            other => other.into(),
        })?;
        info!(alarm_id = %stored.id, trigger = %stored.trigger, "alarm created");
        Ok(stored)
    }

    pub fn update_alarm(&self, id: &AlarmId, patch: AlarmPatch) -> EngineResult<Arc<AlarmRecord>> {
        patch.validate(Utc::now())?;
        let record = self.store.update(id, |record| {
            ensure_visible(record)?;
            patch.apply(record);
            Ok::<_, EngineError>(())
        })?;
        info!(alarm_id = %id, version = record.version, "alarm updated");
        Ok(record)
    }

    /// Tombstones the alarm. The row is purged once every backend has
    /// confirmed the cancel.
    pub fn delete_alarm(&self, id: &AlarmId) -> EngineResult<()> {
        let record = self.store.get(id)?;
        if record.pending_delete {
            return Ok(());
        }
        let record = self.store.mark_pending_delete(id)?;
        info!(alarm_id = %id, version = record.version, "alarm delete requested");
        Ok(())
    }

    /// Enables or soft-disables the alarm. Disabling keeps the row and
    /// cancels it on the backends.
    pub fn toggle_enabled(&self, id: &AlarmId, enabled: bool) -> EngineResult<Arc<AlarmRecord>> {
        let now = Utc::now();
        let record = self.store.update(id, |record| {
            ensure_visible(record)?;
            if enabled && !record.enabled {
                validate_trigger(&record.trigger, now)?;
            }
            if !enabled {
                record.snooze_state = SnoozeState::default();
            }
            record.enabled = enabled;
            Ok::<_, EngineError>(())
        })?;
        info!(alarm_id = %id, enabled, version = record.version, "alarm toggled");
        Ok(record)
    }

    /// Pushes the next ring out by `duration`, or the alarm's own snooze
    /// length when `None`. Fails once the snooze limit is reached.
    pub fn snooze(
        &self,
        id: &AlarmId,
        duration: Option<std::time::Duration>,
    ) -> EngineResult<Arc<AlarmRecord>> {
        let now = Utc::now();
        let record = self.store.update(id, |record| {
            ensure_visible(record)?;
            if !record.enabled {
                return Err(EngineError::Validation(format!("alarm {id} is disabled")));
            }
            let max = record.snooze.max_count;
            if record.snooze_state.count >= max {
                return Err(EngineError::Validation(format!(
                    "alarm {id} reached its snooze limit of {max}"
                )));
            }
            let duration = duration
                .unwrap_or_else(|| std::time::Duration::from_secs(record.snooze.duration_secs.into()));
            let delay = chrono::Duration::from_std(duration)
                .ok()
                .filter(|d| *d > chrono::Duration::zero())
                .ok_or_else(|| EngineError::Validation("snooze duration must be positive".into()))?;
            record.snooze_state.count += 1;
            record.snooze_state.snoozed_until = Some(now + delay);
            Ok::<_, EngineError>(())
        })?;
        info!(
            alarm_id = %id,
            count = record.snooze_state.count,
            until = ?record.snooze_state.snoozed_until,
            "alarm snoozed"
        );
        Ok(record)
    }

    /// Ends the current ring. Clears any snooze; a one-shot alarm is disabled.
    pub fn dismiss(&self, id: &AlarmId) -> EngineResult<Arc<AlarmRecord>> {
        let record = self.store.update(id, |record| {
            ensure_visible(record)?;
            record.snooze_state = SnoozeState::default();
            if matches!(record.trigger, Trigger::Once { .. }) {
                record.enabled = false;
            }
            Ok::<_, EngineError>(())
        })?;
        info!(alarm_id = %id, enabled = record.enabled, "alarm dismissed");
        Ok(record)
    }

    /// Records that the alarm rang.
    ///
    /// The content change bumps the version, so backends without recurrence
    /// support are re-armed for the next occurrence.
    pub fn fire(&self, id: &AlarmId) -> EngineResult<Arc<AlarmRecord>> {
        let now = Utc::now();
        let record = self.store.update(id, |record| {
            ensure_visible(record)?;
            record.last_fired_at = Some(now);
            record.snooze_state.snoozed_until = None;
            Ok::<_, EngineError>(())
        })?;
        info!(alarm_id = %id, version = record.version, "alarm fired");
        Ok(record)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the alarm unless it is missing or being deleted.
    pub fn get_alarm(&self, id: &AlarmId) -> EngineResult<Arc<AlarmRecord>> {
        let record = self.store.get(id)?;
        ensure_visible(&record)?;
        Ok(record)
    }

    /// Lists alarms by next fire time, then id.
    pub fn list_alarms(&self, filter: AlarmFilter) -> AlarmListing {
        self.store.list(filter)
    }

    /// Derived data for the alarm, served from the cache.
    ///
    /// An entry whose next fire time has already passed is recomputed.
    pub fn derived(&self, id: &AlarmId) -> EngineResult<DerivedAlarm> {
        let now = Utc::now();
        let derived = self.cache.get_or_compute(id, |record| derive(record, now))?;
        if derived.next_fire_at.is_some_and(|at| at <= now) {
            debug!(alarm_id = %id, "cached fire time elapsed, recomputing");
            self.cache.invalidate(id);
            return Ok(self.cache.get_or_compute(id, |record| derive(record, now))?);
        }
        Ok(derived)
    }

    /// Next time the alarm rings. `None` if it is disabled or has no
    /// occurrence left.
    pub fn next_fire(&self, id: &AlarmId) -> EngineResult<Option<DateTime<Utc>>> {
        let record = self.get_alarm(id)?;
        if !record.enabled {
            return Ok(None);
        }
        Ok(self.derived(id)?.next_fire_at)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn health(&self) -> Vec<BackendHealth> {
        self.health.snapshot()
    }

    pub fn migration_state(&self) -> EngineResult<MigrationState> {
        Ok(self.store.migration_state()?)
    }

    /// Queued backend work, for inspection.
    pub fn pending_tasks(&self) -> EngineResult<Vec<SyncTask>> {
        Ok(self.store.all_tasks()?)
    }

    /// Direct read access to the store, including tombstoned rows.
    pub fn store(&self) -> &Arc<SyncedStore> {
        &self.store
    }

    // ========================================================================
    // Sync control
    // ========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    /// Drains pending changes and runs every due task, for foreground
    /// resync.
    pub async fn sync_now(&self) -> EngineResult<()> {
        Ok(self.sync.sync_now().await?)
    }

    /// Compares each backend with the store and repairs drift.
    pub async fn reconcile(&self) -> EngineResult<Vec<DriftReport>> {
        Ok(self.sync.reconcile_now().await?)
    }

    /// Stops the coordinator after in-flight calls finish. Idempotent.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.sync.shutdown().await?;
        info!("alarm engine stopped");
        Ok(())
    }
}

/// Tombstoned alarms are invisible to collaborators.
fn ensure_visible(record: &AlarmRecord) -> EngineResult<()> {
    if record.pending_delete {
        return Err(EngineError::NotFound(record.id.clone()));
    }
    Ok(())
}
