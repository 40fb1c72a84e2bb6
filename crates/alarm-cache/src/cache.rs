//! Sharded LRU cache of derived alarm data.
//!
//! Entries are keyed by alarm id and tagged with the fingerprint of the record
//! they were computed from. A read re-fingerprints the current record; a
//! mismatched entry is dropped and recomputed. There is no cache-wide lock:
//! each shard has its own mutex and computes are serialized per key.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alarm_store::{AlarmId, AlarmRecord, AlarmStore, ChangeSink, KeyedLocks};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::fingerprint::Fingerprint;
use crate::{CacheError, CacheResult};

/// Default number of independently locked shards.
pub const DEFAULT_SHARDS: usize = 8;

/// Derived, memoizable data for one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAlarm {
    pub next_fire_at: Option<DateTime<Utc>>,
    pub content_locator: Option<String>,
}

/// Where the cache checks that a key is still live.
pub trait RecordSource: Send + Sync {
    /// Returns the current record, or `None` if it is gone or tombstoned.
    fn current(&self, id: &AlarmId) -> Option<Arc<AlarmRecord>>;
}

impl<S: ChangeSink> RecordSource for AlarmStore<S> {
    fn current(&self, id: &AlarmId) -> Option<Arc<AlarmRecord>> {
        self.find(id).filter(|record| !record.pending_delete)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries pushed out by the LRU bound.
    pub evictions: u64,
    /// Entries dropped because their fingerprint or record went stale.
    pub stale_evictions: u64,
    pub entries: usize,
}

/// A cached value and its bookkeeping, as seen through [`DerivedCache::peek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Fingerprint of the record the value was computed from.
    pub fingerprint: Fingerprint,
    pub value: DerivedAlarm,
    pub created_at: DateTime<Utc>,
    /// Last hit, or `created_at` if never read back.
    pub last_access: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    stale_evictions: AtomicU64,
}

pub struct DerivedCache {
    shards: Vec<Mutex<LruCache<AlarmId, CacheEntry>>>,
    hasher: RandomState,
    compute_locks: KeyedLocks<AlarmId>,
    source: Arc<dyn RecordSource>,
    counters: Counters,
}

impl DerivedCache {
    /// Creates a cache bounded to `max_entries` across [`DEFAULT_SHARDS`] shards.
    pub fn new(max_entries: usize, source: Arc<dyn RecordSource>) -> CacheResult<Self> {
        Self::with_shards(max_entries, DEFAULT_SHARDS, source)
    }

    /// Creates a cache with an explicit shard count.
    ///
    /// The shard count is clamped to `max_entries` so the total bound holds.
    pub fn with_shards(
        max_entries: usize,
        shards: usize,
        source: Arc<dyn RecordSource>,
    ) -> CacheResult<Self> {
        if max_entries == 0 {
            return Err(CacheError::InvalidCapacity(max_entries));
        }
        let shard_count = shards.clamp(1, max_entries);
        let per_shard = NonZeroUsize::new(max_entries / shard_count)
            .ok_or(CacheError::InvalidCapacity(max_entries))?;

        Ok(Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            hasher: RandomState::new(),
            compute_locks: KeyedLocks::new(),
            source,
            counters: Counters::default(),
        })
    }

    fn shard(&self, id: &AlarmId) -> &Mutex<LruCache<AlarmId, CacheEntry>> {
        let idx = (self.hasher.hash_one(id) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Returns the cached derived data for `id`, computing it on a miss.
    ///
    /// `compute` runs synchronously while holding only the per-key lock.
    /// Yields [`CacheError::NotFound`] if the alarm no longer exists.
    pub fn get_or_compute<F>(&self, id: &AlarmId, compute: F) -> CacheResult<DerivedAlarm>
    where
        F: FnOnce(&AlarmRecord) -> DerivedAlarm,
    {
        let Some(record) = self.source.current(id) else {
            if self.shard(id).lock().pop(id).is_some() {
                self.counters.stale_evictions.fetch_add(1, Ordering::Relaxed);
            }
            return Err(CacheError::NotFound(id.clone()));
        };
        let fingerprint = Fingerprint::of(&record);

        if let Some(value) = self.lookup(id, fingerprint) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let _guard = self.compute_locks.lock(id);
        // Another caller may have filled the entry while we waited.
        if let Some(value) = self.lookup(id, fingerprint) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute(&record);
        let now = Utc::now();
        let evicted = self.shard(id).lock().push(
            id.clone(),
            CacheEntry {
                fingerprint,
                value: value.clone(),
                created_at: now,
                last_access: now,
            },
        );
        if let Some((evicted_id, _)) = evicted {
            if &evicted_id != id {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(alarm_id = %evicted_id, "cache entry evicted");
            }
        }
        Ok(value)
    }

    /// Returns the entry if its fingerprint matches, dropping it otherwise.
    fn lookup(&self, id: &AlarmId, fingerprint: Fingerprint) -> Option<DerivedAlarm> {
        let mut shard = self.shard(id).lock();
        let matches = shard.peek(id).map(|entry| entry.fingerprint == fingerprint)?;
        if !matches {
            shard.pop(id);
            self.counters.stale_evictions.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let entry = shard.get_mut(id)?;
        entry.last_access = Utc::now();
        Some(entry.value.clone())
    }

    /// Returns the entry for `id` as stored. Leaves recency, counters and
    /// the entry itself untouched, even if it is stale.
    pub fn peek(&self, id: &AlarmId) -> Option<CacheEntry> {
        self.shard(id).lock().peek(id).cloned()
    }

    /// Removes any entry for `id`, regardless of fingerprint.
    pub fn invalidate(&self, id: &AlarmId) -> bool {
        self.shard(id).lock().pop(id).is_some()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entry bound across shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().cap().get()).sum()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            stale_evictions: self.counters.stale_evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Standard derivation: next occurrence (snooze-aware) and the content locator.
///
/// Independent of the enabled flag, which is not part of the fingerprint.
pub fn derive(record: &AlarmRecord, now: DateTime<Utc>) -> DerivedAlarm {
    let snoozed = record
        .snooze_state
        .snoozed_until
        .filter(|until| *until > now);
    DerivedAlarm {
        next_fire_at: snoozed.or_else(|| record.trigger.next_after(now)),
        content_locator: record
            .content_ref
            .as_ref()
            .map(|content| format!("content/{}/{}", record.id, content)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_store::{DayOfWeek, NullSink, StoreError, Trigger};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn setup(capacity: usize) -> (Arc<AlarmStore<NullSink>>, DerivedCache) {
        let store = Arc::new(AlarmStore::in_memory(NullSink).unwrap());
        let cache = DerivedCache::new(capacity, store.clone()).unwrap();
        (store, cache)
    }

    fn put(store: &AlarmStore<NullSink>, id: &str) -> Arc<AlarmRecord> {
        store
            .put(AlarmRecord::new(
                AlarmId::from_string(id),
                Trigger::weekly([DayOfWeek::Wed], 8, 0),
                id,
            ))
            .unwrap()
    }

    #[test]
    fn zero_capacity_rejected() {
        let store = Arc::new(AlarmStore::in_memory(NullSink).unwrap());
        assert!(matches!(
            DerivedCache::new(0, store),
            Err(CacheError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn second_read_is_a_hit() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_compute(&record.id, |r| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    derive(r, Utc::now())
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[test]
    fn peek_reports_entry_bookkeeping() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        assert_eq!(cache.peek(&record.id), None);

        let value = cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap();
        let created = cache.peek(&record.id).unwrap();
        assert_eq!(created.value, value);
        assert_eq!(created.fingerprint, Fingerprint::of(&record));
        assert_eq!(created.last_access, created.created_at);

        thread::sleep(std::time::Duration::from_millis(5));
        cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap();
        let touched = cache.peek(&record.id).unwrap();
        assert_eq!(touched.created_at, created.created_at);
        assert!(touched.last_access > created.last_access);

        // Peeking is not a read.
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn content_change_recomputes() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        let first = cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap();

        store
            .update(&record.id, |r| {
                r.content_ref = Some("v2".to_string());
                Ok::<_, StoreError>(())
            })
            .unwrap();
        let second = cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap();

        assert_eq!(first.content_locator, None);
        assert_eq!(second.content_locator.as_deref(), Some("content/a1/v2"));
        assert_eq!(cache.stats().stale_evictions, 1);
    }

    #[test]
    fn deleted_alarm_self_evicts() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap();
        assert_eq!(cache.len(), 1);

        store.delete(&record.id).unwrap();
        let err = cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn tombstoned_alarm_is_not_found() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        store.mark_pending_delete(&record.id).unwrap();
        assert!(matches!(
            cache.get_or_compute(&record.id, |r| derive(r, Utc::now())),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn invalidate_removes_regardless_of_fingerprint() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        cache
            .get_or_compute(&record.id, |r| derive(r, Utc::now()))
            .unwrap();
        assert!(cache.invalidate(&record.id));
        assert!(!cache.invalidate(&record.id));
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_bound_holds() {
        let store = Arc::new(AlarmStore::in_memory(NullSink).unwrap());
        let cache = DerivedCache::with_shards(4, 1, store.clone()).unwrap();
        for i in 0..10 {
            let record = put(&store, &format!("a{i}"));
            cache
                .get_or_compute(&record.id, |r| derive(r, Utc::now()))
                .unwrap();
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.stats().evictions, 6);
    }

    #[test]
    fn shards_clamped_to_capacity() {
        let store = Arc::new(AlarmStore::in_memory(NullSink).unwrap());
        let cache = DerivedCache::with_shards(3, 8, store).unwrap();
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn concurrent_readers_compute_once() {
        let (store, cache) = setup(16);
        let record = put(&store, "a1");
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let id = record.id.clone();
                thread::spawn(move || {
                    cache
                        .get_or_compute(&id, |r| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            derive(r, Utc::now())
                        })
                        .unwrap()
                })
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn derive_prefers_active_snooze() {
        let mut record = AlarmRecord::new(
            AlarmId::from_string("a1"),
            Trigger::weekly([DayOfWeek::Wed], 8, 0),
            "x",
        );
        let now = Utc::now();
        let until = now + chrono::Duration::minutes(9);
        record.snooze_state.snoozed_until = Some(until);
        assert_eq!(derive(&record, now).next_fire_at, Some(until));

        record.enabled = false;
        assert_eq!(derive(&record, now).next_fire_at, Some(until));
    }
}
