//! The sync coordinator: planning, dispatch and result handling.
//!
//! A single worker loop owns the change stream and the task set. Adapter
//! calls run as spawned tasks, at most one per `(alarm, backend)` pair and
//! at most `max_concurrency` overall. Every call completion records health,
//! updates sync metadata, and replans the alarm.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use alarm_backends::{BackendAdapter, BackendError, BackendResult, ScheduleHandle};
use alarm_cache::{derive, CacheError, DerivedCache};
use alarm_health::{CallOutcome, HealthMonitor, HealthTransition};
use alarm_store::{
    AlarmFilter, AlarmId, BackendKind, BlockReason, KeyedLocks, StoreChange, SyncOp, SyncStatus,
    SyncTask,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{jittered_backoff, SyncConfig};
use crate::events::SyncEvent;
use crate::feed::{ChangeStream, SyncedStore};
use crate::planner;
use crate::reconcile::DriftReport;
use crate::{SyncError, SyncResult};

/// Upper bound on drain-dispatch-await rounds in one foreground sync.
const MAX_SETTLE_ROUNDS: usize = 32;

const EVENT_CAPACITY: usize = 256;

/// The two adapters the coordinator drives.
#[derive(Clone)]
pub struct Backends {
    pub native: Arc<dyn BackendAdapter>,
    pub legacy: Arc<dyn BackendAdapter>,
}

impl Backends {
    pub fn get(&self, kind: BackendKind) -> &Arc<dyn BackendAdapter> {
        match kind {
            BackendKind::Native => &self.native,
            BackendKind::Legacy => &self.legacy,
        }
    }

    fn validate(&self) -> SyncResult<()> {
        for expected in BackendKind::ALL {
            let found = self.get(expected).kind();
            if found != expected {
                return Err(SyncError::AdapterMismatch { expected, found });
            }
        }
        Ok(())
    }
}

enum Command {
    SyncNow(oneshot::Sender<()>),
    Reconcile(oneshot::Sender<SyncResult<Vec<DriftReport>>>),
    Shutdown,
}

/// State shared by the worker loop and its spawned tasks.
pub(crate) struct Inner {
    pub(crate) store: Arc<SyncedStore>,
    pub(crate) cache: Arc<DerivedCache>,
    pub(crate) backends: Backends,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    in_flight: Mutex<HashSet<(AlarmId, BackendKind)>>,
    plan_locks: KeyedLocks<AlarmId>,
    replan_all: AtomicBool,
}

pub struct Coordinator {
    inner: Arc<Inner>,
    stream: Mutex<Option<ChangeStream>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<SyncedStore>,
        cache: Arc<DerivedCache>,
        backends: Backends,
        health: Arc<HealthMonitor>,
        config: SyncConfig,
        stream: ChangeStream,
    ) -> SyncResult<Self> {
        backends.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                cache,
                backends,
                health,
                config,
                events,
                in_flight: Mutex::new(HashSet::new()),
                plan_locks: KeyedLocks::new(),
                replan_all: AtomicBool::new(false),
            }),
            stream: Mutex::new(Some(stream)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Spawns the worker loop. Can only be called once.
    ///
    /// The loop first runs migration and reconciliation, then serves
    /// changes, dispatch ticks, reconcile ticks and commands until shutdown.
    pub fn start(&self) -> SyncResult<CoordinatorHandle> {
        let stream = self.stream.lock().take().ok_or(SyncError::AlreadyStarted)?;
        let (commands, receiver) = mpsc::channel(16);
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(run(inner, stream, receiver));
        info!(
            max_concurrency = self.inner.config.max_concurrency,
            max_attempts = self.inner.config.max_attempts,
            "sync coordinator started"
        );
        Ok(CoordinatorHandle {
            commands,
            join: Mutex::new(Some(join)),
            events: self.inner.events.clone(),
        })
    }
}

/// Control surface of a running coordinator.
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    join: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl CoordinatorHandle {
    /// Drains pending changes and runs every due task, waiting until no
    /// more work is immediately due.
    pub async fn sync_now(&self) -> SyncResult<()> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::SyncNow(reply))
            .await
            .map_err(|_| SyncError::Stopped)?;
        done.await.map_err(|_| SyncError::Stopped)
    }

    /// Runs a reconciliation pass, then settles like [`Self::sync_now`].
    pub async fn reconcile_now(&self) -> SyncResult<Vec<DriftReport>> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Reconcile(reply))
            .await
            .map_err(|_| SyncError::Stopped)?;
        done.await.map_err(|_| SyncError::Stopped)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stops the loop after in-flight calls finish. Idempotent.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let join = self.join.lock().take();
        let Some(join) = join else {
            return Ok(());
        };
        // A closed channel means the loop already exited.
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(err) = join.await {
            error!(error = %err, "sync coordinator task failed");
        }
        Ok(())
    }
}

async fn run(inner: Arc<Inner>, mut stream: ChangeStream, mut commands: mpsc::Receiver<Command>) {
    if let Err(err) = inner.reconcile().await {
        warn!(error = %err, "startup reconciliation failed");
    }

    let mut tasks = JoinSet::new();
    let permits = Arc::new(Semaphore::new(inner.config.max_concurrency.max(1)));

    let mut dispatch = interval(inner.config.dispatch_interval);
    dispatch.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let reconcile_every = inner.config.reconcile_interval;
    let mut reconcile = interval_at(tokio::time::Instant::now() + reconcile_every, reconcile_every);
    reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::SyncNow(reply)) => {
                    inner.settle(&mut stream, &mut tasks, &permits).await;
                    let _ = reply.send(());
                }
                Some(Command::Reconcile(reply)) => {
                    let result = inner.reconcile().await;
                    inner.settle(&mut stream, &mut tasks, &permits).await;
                    let _ = reply.send(result);
                }
                Some(Command::Shutdown) | None => break,
            },
            change = stream.recv() => match change {
                Some(change) => {
                    inner.on_change(change);
                    inner.replan_if_requested(&stream);
                    inner.dispatch(&mut tasks, &permits);
                }
                None => break,
            },
            _ = dispatch.tick() => {
                inner.replan_if_requested(&stream);
                inner.rearm_elapsed();
                inner.dispatch(&mut tasks, &permits);
            }
            _ = reconcile.tick() => {
                if let Err(err) = inner.reconcile().await {
                    warn!(error = %err, "reconciliation failed");
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    error!(error = %err, "sync task panicked");
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "sync task panicked");
        }
    }
    info!("sync coordinator stopped");
}

/// Clears the in-flight mark for a pair when dropped.
struct FlightGuard {
    inner: Arc<Inner>,
    key: Option<(AlarmId, BackendKind)>,
}

impl FlightGuard {
    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.in_flight.lock().remove(&key);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl Inner {
    pub(crate) fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_in_flight(&self, id: &AlarmId) -> bool {
        self.in_flight.lock().iter().any(|(alarm, _)| alarm == id)
    }

    pub(crate) fn is_pair_in_flight(&self, id: &AlarmId, backend: BackendKind) -> bool {
        self.in_flight.lock().contains(&(id.clone(), backend))
    }

    // ========================================================================
    // Change intake
    // ========================================================================

    fn on_change(&self, change: StoreChange) {
        let id = change.id().clone();
        self.cache.invalidate(&id);
        if matches!(change, StoreChange::Purged { .. }) {
            return;
        }
        if let Err(err) = self.plan_alarm(&id) {
            error!(alarm_id = %id, error = %err, "planning failed");
        }
        match self.cache.get_or_compute(&id, |record| derive(record, Utc::now())) {
            Ok(_) | Err(CacheError::NotFound(_)) => {}
            Err(err) => debug!(alarm_id = %id, error = %err, "cache refresh skipped"),
        }
    }

    fn replan_if_requested(&self, stream: &ChangeStream) {
        let overflowed = stream.take_overflow();
        let requested = self.replan_all.swap(false, Ordering::AcqRel);
        if overflowed || requested {
            let planned = self.plan_all();
            info!(planned, overflowed, "replanned every alarm");
        }
    }

    // ========================================================================
    // Planning
    // ========================================================================

    pub(crate) fn plan_all(&self) -> usize {
        let listing = self.store.list(AlarmFilter::all());
        let mut planned = 0;
        for record in listing.iter() {
            match self.plan_alarm(&record.id) {
                Ok(()) => planned += 1,
                Err(err) => error!(alarm_id = %record.id, error = %err, "planning failed"),
            }
        }
        planned
    }

    /// Replans alarms whose armed occurrence has passed on a backend without
    /// recurrence support.
    pub(crate) fn rearm_elapsed(&self) -> usize {
        let now = Utc::now();
        let listing = self.store.list(AlarmFilter::all());
        let mut rearmed = 0;
        for record in listing.iter() {
            let elapsed = BackendKind::ALL
                .iter()
                .any(|backend| record.sync.backend(*backend).needs_rearm(now));
            if !elapsed {
                continue;
            }
            match self.plan_alarm(&record.id) {
                Ok(()) => rearmed += 1,
                Err(err) => error!(alarm_id = %record.id, error = %err, "planning failed"),
            }
        }
        if rearmed > 0 {
            debug!(rearmed, "replanned alarms with an elapsed occurrence");
        }
        rearmed
    }

    /// Queues the work that moves the alarm toward its planned placement and
    /// refreshes its aggregate status. Purges confirmed tombstones.
    pub(crate) fn plan_alarm(&self, id: &AlarmId) -> SyncResult<()> {
        let _guard = self.plan_locks.lock(id);
        let Some(record) = self.store.find(id) else {
            return Ok(());
        };
        let queued: HashMap<BackendKind, SyncTask> = self
            .store
            .tasks_for(id)?
            .into_iter()
            .map(|task| (task.backend, task))
            .collect();
        let plan = planner::plan(&record, &queued, |b| self.health.status(b), Utc::now());
        let in_flight = self.is_in_flight(id);

        if plan.purge && !in_flight {
            self.store.delete(id)?;
            self.cache.invalidate(id);
            info!(alarm_id = %id, "alarm purged after every backend confirmed the delete");
            return Ok(());
        }

        for backend in &plan.drop {
            self.store.drop_task(id, *backend)?;
            debug!(alarm_id = %id, backend = %backend, "dropped obsolete task");
        }
        for (backend, op) in &plan.enqueue {
            let task = SyncTask::new(id.clone(), *backend, *op, record.version);
            if self.store.upsert_task(&task)? {
                debug!(
                    alarm_id = %id,
                    backend = %backend,
                    op = op.as_str(),
                    target_version = record.version,
                    "sync task queued"
                );
            }
        }

        let busy = !plan.enqueue.is_empty()
            || queued.keys().any(|backend| !plan.drop.contains(backend))
            || in_flight;
        let status = if busy {
            if record.sync.migrating {
                SyncStatus::Migrating
            } else {
                SyncStatus::Pending
            }
        } else if plan.stranded || record.sync.is_exhausted() || record.pending_delete {
            SyncStatus::Degraded
        } else {
            SyncStatus::Synced
        };

        if plan.stranded && !busy {
            warn!(alarm_id = %id, "no backend can host alarm");
        }

        let from = record.sync.status;
        let updated = self.store.update_sync(id, |current, sync| {
            if current.version != record.version {
                return;
            }
            sync.status = status;
            if !busy {
                sync.migrating = false;
            }
            if status == SyncStatus::Synced {
                sync.last_error = None;
            }
        })?;
        if updated.sync.status != from {
            debug!(alarm_id = %id, from = %from, to = %updated.sync.status, "sync status changed");
            self.publish(SyncEvent::StatusChanged {
                alarm_id: id.clone(),
                from,
                to: updated.sync.status,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(self: &Arc<Self>, tasks: &mut JoinSet<()>, permits: &Arc<Semaphore>) -> usize {
        if permits.available_permits() == 0 {
            return 0;
        }
        let due = match self.store.due_tasks(Utc::now(), self.config.batch_size) {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to load due tasks");
                return 0;
            }
        };

        let mut started = 0;
        for task in due {
            let key = (task.alarm_id.clone(), task.backend);
            if !self.in_flight.lock().insert(key.clone()) {
                continue;
            }
            let permit = match Arc::clone(permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.in_flight.lock().remove(&key);
                    break;
                }
            };
            let flight = FlightGuard {
                inner: Arc::clone(self),
                key: Some(key),
            };
            let inner = Arc::clone(self);
            tasks.spawn(async move { inner.execute(task, flight, permit).await });
            started += 1;
        }
        started
    }

    /// Foreground sync: repeat drain, dispatch and await until nothing is due.
    async fn settle(
        self: &Arc<Self>,
        stream: &mut ChangeStream,
        tasks: &mut JoinSet<()>,
        permits: &Arc<Semaphore>,
    ) {
        self.rearm_elapsed();
        for _ in 0..MAX_SETTLE_ROUNDS {
            while let Some(change) = stream.try_recv() {
                self.on_change(change);
            }
            self.replan_if_requested(stream);
            let started = self.dispatch(tasks, permits);
            if started == 0 && tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    error!(error = %err, "sync task panicked");
                }
            }
        }
        warn!(rounds = MAX_SETTLE_ROUNDS, "sync did not settle");
    }

    async fn execute(self: Arc<Self>, task: SyncTask, mut flight: FlightGuard, permit: OwnedSemaphorePermit) {
        let id = task.alarm_id.clone();
        if let Err(err) = self.run_task(&task).await {
            error!(
                alarm_id = %id,
                backend = %task.backend,
                error = %err,
                "failed to record sync task outcome"
            );
        }
        drop(permit);
        flight.release();
        if let Err(err) = self.plan_alarm(&id) {
            error!(alarm_id = %id, error = %err, "planning failed");
        }
    }

    async fn run_task(&self, task: &SyncTask) -> SyncResult<()> {
        let Some(record) = self.store.find(&task.alarm_id) else {
            // Purged together with its tasks.
            return Ok(());
        };
        if record.version > task.target_version {
            debug!(
                alarm_id = %task.alarm_id,
                backend = %task.backend,
                target_version = task.target_version,
                version = record.version,
                "skipping superseded task"
            );
            self.store
                .complete_task(&task.alarm_id, task.backend, task.target_version)?;
            return Ok(());
        }

        let adapter = Arc::clone(self.backends.get(task.backend));
        let result = if task.op.is_delete() {
            self.timed(task.backend, adapter.cancel(&record.id))
                .await
                .map(|()| None)
        } else {
            // Without recurrence the backend holds a single occurrence.
            let armed_until = if adapter.supports_recurrence() {
                None
            } else {
                record.next_fire_after(Utc::now())
            };
            self.timed(task.backend, adapter.schedule(&record))
                .await
                .map(|handle| Some((handle, armed_until)))
        };

        match result {
            Ok(scheduled) => self.on_success(task, scheduled),
            Err(err) if err.is_retryable() => self.on_transient_failure(task, err),
            Err(err) => self.on_permanent_failure(task, err),
        }
    }

    /// Runs one adapter call under the deadline and records its health sample.
    pub(crate) async fn timed<T, F>(&self, backend: BackendKind, call: F) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Unavailable(format!(
                "no answer within {}ms",
                self.config.call_timeout.as_millis()
            ))),
        };
        let outcome = match &result {
            Err(err) if err.is_availability_failure() => CallOutcome::Failed,
            _ => CallOutcome::Answered,
        };
        if let Some(transition) = self.health.record(backend, outcome, started.elapsed()) {
            self.on_health_transition(transition);
        }
        result
    }

    pub(crate) fn on_health_transition(&self, transition: HealthTransition) {
        self.publish(SyncEvent::BackendHealthChanged {
            backend: transition.backend,
            from: transition.from,
            to: transition.to,
        });
        // Placement depends on health.
        self.replan_all.store(true, Ordering::Release);
    }

    // ========================================================================
    // Results
    // ========================================================================

    fn on_success(
        &self,
        task: &SyncTask,
        scheduled: Option<(ScheduleHandle, Option<DateTime<Utc>>)>,
    ) -> SyncResult<()> {
        let mut stale = false;
        self.store.update_sync(&task.alarm_id, |record, sync| {
            stale = record.version > task.target_version;
            let backend = sync.backend_mut(task.backend);
            backend.last_synced_version = backend.last_synced_version.max(task.target_version);
            match scheduled {
                Some((handle, armed_until)) if !task.op.is_delete() => {
                    backend.affine = true;
                    backend.handle = Some(handle.0);
                    backend.armed_until = armed_until;
                }
                _ => {
                    backend.affine = false;
                    backend.handle = None;
                    backend.armed_until = None;
                }
            }
            // A cancel says nothing about whether scheduling works again.
            if !task.op.is_delete() && backend.block == Some(BlockReason::RetriesExhausted) {
                backend.block = None;
            }
        })?;
        self.store
            .complete_task(&task.alarm_id, task.backend, task.target_version)?;
        debug!(
            alarm_id = %task.alarm_id,
            backend = %task.backend,
            op = task.op.as_str(),
            target_version = task.target_version,
            stale,
            "sync task succeeded"
        );
        Ok(())
    }

    fn on_transient_failure(&self, task: &SyncTask, err: BackendError) -> SyncResult<()> {
        let attempt = task.attempt + 1;
        let message = err.to_string();

        if attempt < self.config.max_attempts {
            let delay = jittered_backoff(attempt, &self.config);
            let mut retry = task.clone();
            retry.attempt = attempt;
            retry.next_retry_at =
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            retry.last_error = Some(message.clone());
            if self.store.reschedule_task(&retry)? {
                debug!(
                    alarm_id = %task.alarm_id,
                    backend = %task.backend,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "sync task will retry"
                );
            }
            self.store.update_sync(&task.alarm_id, |_, sync| {
                sync.last_error = Some(message);
            })?;
            return Ok(());
        }

        self.store
            .complete_task(&task.alarm_id, task.backend, task.target_version)?;
        let mut stale = false;
        let mut outdated_copy = false;
        self.store.update_sync(&task.alarm_id, |record, sync| {
            if record.version > task.target_version {
                stale = true;
                return;
            }
            let backend = sync.backend_mut(task.backend);
            backend.block = Some(BlockReason::RetriesExhausted);
            if !task.op.is_delete() {
                // The backend never took this version; any copy it holds is older.
                outdated_copy = backend.affine;
                backend.affine = false;
                backend.handle = None;
                backend.armed_until = None;
            }
            sync.last_error = Some(message.clone());
        })?;
        if stale {
            return Ok(());
        }
        if outdated_copy {
            let cancel = SyncTask::new(
                task.alarm_id.clone(),
                task.backend,
                SyncOp::Delete,
                task.target_version,
            );
            if self.store.upsert_task(&cancel)? {
                debug!(
                    alarm_id = %task.alarm_id,
                    backend = %task.backend,
                    target_version = task.target_version,
                    "cancelling outdated copy"
                );
            }
        }
        warn!(
            alarm_id = %task.alarm_id,
            backend = %task.backend,
            attempts = attempt,
            error = %message,
            "sync retries exhausted"
        );
        self.publish(SyncEvent::RetriesExhausted {
            alarm_id: task.alarm_id.clone(),
            backend: task.backend,
            attempts: attempt,
            last_error: message,
        });
        Ok(())
    }

    fn on_permanent_failure(&self, task: &SyncTask, err: BackendError) -> SyncResult<()> {
        let message = err.to_string();
        self.store
            .complete_task(&task.alarm_id, task.backend, task.target_version)?;

        let mut newly_blocked = false;
        self.store.update_sync(&task.alarm_id, |record, sync| {
            if record.version > task.target_version {
                return;
            }
            let backend = sync.backend_mut(task.backend);
            backend.affine = false;
            backend.handle = None;
            backend.armed_until = None;
            if task.op.is_delete() {
                // A refused cancel leaves nothing to retry; count the alarm as gone.
                backend.last_synced_version = backend.last_synced_version.max(task.target_version);
            } else {
                newly_blocked = backend.block.is_none();
                backend.block = err.block_reason();
            }
            sync.last_error = Some(message.clone());
        })?;

        warn!(
            alarm_id = %task.alarm_id,
            backend = %task.backend,
            op = task.op.as_str(),
            error = %message,
            "backend refused alarm"
        );
        if newly_blocked {
            self.publish(SyncEvent::UserVisibleError {
                alarm_id: task.alarm_id.clone(),
                backend: task.backend,
                message,
            });
        }
        Ok(())
    }
}
