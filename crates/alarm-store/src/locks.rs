//! Per-key mutual exclusion.
//!
//! Each key gets its own mutex, created on first use and dropped once the
//! last guard for it is released. The registry lock is held only while
//! looking up or pruning a slot, never while the key is locked.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

/// Holds the lock for one key until dropped.
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until the lock for `key` is held.
    pub fn lock(&self, key: &K) -> KeyGuard<'_, K> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        KeyGuard {
            owner: self,
            key: key.clone(),
            guard: Some(slot.lock_arc()),
        }
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        // Release first so waiters can proceed, then prune the slot if nobody else holds it.
        drop(self.guard.take());
        let mut slots = self.owner.slots.lock();
        if let Some(slot) = slots.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}
