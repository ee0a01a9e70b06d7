//! Per-key mutual exclusion
//!
//! `KeyedMutex` hands out an async guard per key. Holders of different keys
//! never contend; holders of the same key are served one at a time. Slots
//! are created on demand and removed when the last holder or waiter leaves,
//! so the map only ever contains keys that are in use.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Mutex for one key plus the number of holders and waiters referencing it
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    refs: usize,
}

pub struct KeyedMutex<K: Eq + Hash + Clone> {
    slots: Arc<Mutex<AHashMap<K, Slot>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        KeyedMutex {
            slots: Arc::new(Mutex::new(AHashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let mutex = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                mutex: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            slot.mutex.clone()
        };
        // Built before waiting so a cancelled wait still gives back its ref
        let mut hold = KeyGuard {
            key: key.clone(),
            guard: None,
            slots: self.slots.clone(),
        };
        hold.guard = Some(mutex.lock_owned().await);
        hold
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Exclusive hold on one key; released on drop
pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<AHashMap<K, Slot>>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
