//! Rule-style tests for the sync coordinator, run against in-memory ports.
//!
//! - `placement.rs` - Rules 1-8 (Targets, Hand-off, Re-arming & Delete Cascade)
//! - `failures.rs`  - Rules 9-16 (Retries, Blocks & Fallback)
//! - `migration.rs` - Rules 17-21 (One-time Legacy Import)
//! - `drift.rs`     - Rules 22-27 (Reconciliation & Change Overflow)


use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alarm_backends::{
    InMemoryLegacyCenter, InMemoryNativeScheduler, LegacyAdapter, LegacyNotificationCenter,
    NativeAdapter, NativeScheduler,
};
use alarm_cache::{DerivedCache, RecordSource};
use alarm_health::{HealthConfig, HealthMonitor};
use alarm_store::{AlarmId, AlarmRecord, AlarmStore, DayOfWeek, StoreError, Trigger};
use tokio::sync::broadcast;

use crate::{Backends, ChangeFeed, Coordinator, CoordinatorHandle, SyncConfig, SyncEvent, SyncedStore};

/// Fast, deterministic timing: zero backoff, no background ticks.
pub(crate) fn test_config() -> SyncConfig {
    SyncConfig {
        change_queue_capacity: 64,
        batch_size: 16,
        max_concurrency: 4,
        max_attempts: 3,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        backoff_jitter: 0.0,
        call_timeout: Duration::from_millis(100),
        dispatch_interval: Duration::from_secs(3600),
        reconcile_interval: Duration::from_secs(3600),
    }
}

/// Health that never trips on the handful of calls a test makes.
pub(crate) fn quiet_health() -> HealthConfig {
    HealthConfig {
        window_size: 50,
        min_samples: 50,
        ..HealthConfig::default()
    }
}

pub(crate) fn weekly(id: &str, hour: u8) -> AlarmRecord {
    AlarmRecord::new(
        AlarmId::from_string(id),
        Trigger::weekly(DayOfWeek::ALL, hour, 0),
        format!("alarm {id}"),
    )
}

pub(crate) struct Harness {
    pub store: Arc<SyncedStore>,
    pub native: Arc<InMemoryNativeScheduler>,
    pub legacy: Arc<InMemoryLegacyCenter>,
    pub handle: CoordinatorHandle,
    pub events: broadcast::Receiver<SyncEvent>,
    _coordinator: Coordinator,
}

pub(crate) struct HarnessBuilder {
    native: Arc<InMemoryNativeScheduler>,
    legacy: Arc<InMemoryLegacyCenter>,
    config: SyncConfig,
    health: HealthConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            native: Arc::new(InMemoryNativeScheduler::new()),
            legacy: Arc::new(InMemoryLegacyCenter::new()),
            config: test_config(),
            health: quiet_health(),
        }
    }

    pub fn ports(
        mut self,
        native: Arc<InMemoryNativeScheduler>,
        legacy: Arc<InMemoryLegacyCenter>,
    ) -> Self {
        self.native = native;
        self.legacy = legacy;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Starts on an in-memory store. Nothing runs until the test awaits.
    pub fn start(self) -> Harness {
        let (feed, stream) = ChangeFeed::channel(self.config.change_queue_capacity);
        let store = AlarmStore::in_memory(feed).unwrap();
        self.start_with(store, stream)
    }

    pub fn start_at(self, path: &Path) -> Harness {
        let (feed, stream) = ChangeFeed::channel(self.config.change_queue_capacity);
        let store = AlarmStore::open(path, feed).unwrap();
        self.start_with(store, stream)
    }

    fn start_with(self, store: SyncedStore, stream: crate::ChangeStream) -> Harness {
        let store = Arc::new(store);
        let source: Arc<dyn RecordSource> = store.clone();
        let cache = Arc::new(DerivedCache::new(64, source).unwrap());
        let native_port: Arc<dyn NativeScheduler> = self.native.clone();
        let legacy_port: Arc<dyn LegacyNotificationCenter> = self.legacy.clone();
        let backends = Backends {
            native: Arc::new(NativeAdapter::new(native_port)),
            legacy: Arc::new(LegacyAdapter::new(legacy_port)),
        };
        let health = Arc::new(HealthMonitor::new(self.health).unwrap());
        let coordinator =
            Coordinator::new(Arc::clone(&store), cache, backends, health, self.config, stream)
                .unwrap();
        let events = coordinator.subscribe();
        let handle = coordinator.start().unwrap();
        Harness {
            store,
            native: self.native,
            legacy: self.legacy,
            handle,
            events,
            _coordinator: coordinator,
        }
    }
}

impl Harness {
    pub fn start() -> Self {
        HarnessBuilder::new().start()
    }

    pub async fn sync(&self) {
        self.handle.sync_now().await.unwrap();
    }

    pub fn record(&self, id: &str) -> Arc<AlarmRecord> {
        self.store.get(&AlarmId::from_string(id)).unwrap()
    }

    pub fn edit(&self, id: &str, f: impl FnOnce(&mut AlarmRecord)) -> Arc<AlarmRecord> {
        self.store
            .update(&AlarmId::from_string(id), |record| {
                f(record);
                Ok::<_, StoreError>(())
            })
            .unwrap()
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn stop(self) {
        self.handle.shutdown().await.unwrap();
    }
}

pub(crate) fn id(s: &str) -> AlarmId {
    AlarmId::from_string(s)
}

/// Basic workflow: create, sync, edit, sync, delete, sync.
#[tokio::test]
async fn basic_workflow() {
    let h = Harness::start();

    h.store.put(weekly("a1", 7)).unwrap();
    h.sync().await;
    let record = h.record("a1");
    assert_eq!(record.sync.status, alarm_store::SyncStatus::Synced);
    assert!(h.native.contains(&id("a1")));

    h.edit("a1", |r| r.label = "Wake up".to_string());
    h.sync().await;
    assert_eq!(h.native.request_for(&id("a1")).unwrap().label, "Wake up");
    assert_eq!(h.record("a1").sync.native.last_synced_version, 2);

    h.store.mark_pending_delete(&id("a1")).unwrap();
    h.sync().await;
    assert!(h.store.find(&id("a1")).is_none());
    assert!(h.native.is_empty());
    assert!(h.store.all_tasks().unwrap().is_empty());

    h.stop().await;
}
