//! Shared setup for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use alarm_backends::{ExportedAlarm, InMemoryLegacyCenter, InMemoryNativeScheduler};
use alarm_engine::{
    AlarmEngine, AlarmId, AlarmSpec, DayOfWeek, EngineConfig, EnginePorts, Paths, SnoozePolicy,
    SoundRef, SyncEvent, Trigger,
};
use tokio::sync::broadcast;

/// Zero backoff, short deadlines, no background ticks, health that never
/// trips on a handful of calls.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        cache_capacity: 64,
        change_queue_capacity: 64,
        max_attempts: 3,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        backoff_jitter: 0.0,
        call_timeout_ms: 100,
        dispatch_interval_ms: 3_600_000,
        reconcile_interval_secs: 3_600,
        health_window_size: 50,
        health_min_samples: 50,
        ..EngineConfig::default()
    }
}

pub fn weekly(id: &str, hour: u8) -> AlarmSpec {
    AlarmSpec::new(Trigger::weekly(DayOfWeek::ALL, hour, 0), format!("alarm {id}")).with_id(id)
}

pub fn legacy_alarm(id: &str) -> ExportedAlarm {
    ExportedAlarm {
        id: id.into(),
        trigger: Trigger::weekly([DayOfWeek::Tue, DayOfWeek::Thu], 6, 30),
        enabled: true,
        label: format!("legacy {id}"),
        content_ref: None,
        sound: SoundRef::default(),
        snooze: SnoozePolicy::default(),
    }
}

pub fn id(s: &str) -> AlarmId {
    AlarmId::from_string(s)
}

pub struct TestEngine {
    pub engine: AlarmEngine,
    pub native: Arc<InMemoryNativeScheduler>,
    pub legacy: Arc<InMemoryLegacyCenter>,
    pub events: broadcast::Receiver<SyncEvent>,
}

impl TestEngine {
    /// In-memory engine over fresh ports.
    pub fn start() -> Self {
        Self::with_ports(
            Arc::new(InMemoryNativeScheduler::new()),
            Arc::new(InMemoryLegacyCenter::new()),
        )
    }

    pub fn with_ports(
        native: Arc<InMemoryNativeScheduler>,
        legacy: Arc<InMemoryLegacyCenter>,
    ) -> Self {
        let engine = AlarmEngine::in_memory(&test_config(), ports(&native, &legacy)).unwrap();
        Self::wrap(engine, native, legacy)
    }

    /// On-disk engine under `paths`.
    pub fn open(
        paths: &Paths,
        native: Arc<InMemoryNativeScheduler>,
        legacy: Arc<InMemoryLegacyCenter>,
    ) -> Self {
        let engine = AlarmEngine::open(paths, &test_config(), ports(&native, &legacy)).unwrap();
        Self::wrap(engine, native, legacy)
    }

    fn wrap(
        engine: AlarmEngine,
        native: Arc<InMemoryNativeScheduler>,
        legacy: Arc<InMemoryLegacyCenter>,
    ) -> Self {
        // The coordinator has not run yet on a current-thread runtime, so
        // this receiver sees every event including startup.
        let events = engine.subscribe();
        Self {
            engine,
            native,
            legacy,
            events,
        }
    }

    pub async fn sync(&self) {
        self.engine.sync_now().await.unwrap();
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn stop(self) {
        self.engine.shutdown().await.unwrap();
    }
}

fn ports(native: &Arc<InMemoryNativeScheduler>, legacy: &Arc<InMemoryLegacyCenter>) -> EnginePorts {
    EnginePorts {
        native: native.clone(),
        legacy: legacy.clone(),
    }
}
