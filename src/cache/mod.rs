//! Query Cache
//!
//! Read-through cache in front of the aggregate queries. Bounded by entry
//! count (least-recently-used eviction) and by a uniform TTL. Writes to the
//! counters never touch it; a reader may see data up to one TTL old.
//!
//! Locking: one mutex guards the entry map and LRU bookkeeping and is never
//! held while a loader runs. A per-key gate collapses concurrent misses on the
//! same key into a single loader call; waiters re-check the map once the gate
//! is theirs. The gate is a performance guard only: correctness of the map
//! does not depend on it.

mod sweeper;

pub use sweeper::{CacheSweeper, Sweep};

use crate::clock::{Clock, ProductionClock, Timestamp};
use crate::sync::KeyedMutex;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Counters describing cache behavior since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a live entry
    pub hits: u64,
    /// Reads that invoked the loader
    pub misses: u64,
    /// Loader invocations that returned an error
    pub load_failures: u64,
    /// Entries dropped to stay within capacity
    pub evictions: u64,
    /// Entries dropped because their TTL passed
    pub expirations: u64,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Timestamp,
    /// Recency tick; also the entry's key in the LRU index
    last_used: u64,
}

struct CacheInner<V> {
    entries: AHashMap<String, CacheEntry<V>>,
    /// Recency order: smallest tick is least recently used
    lru: BTreeMap<u64, String>,
    tick: u64,
    stats: CacheStats,
}

impl<V> CacheInner<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.last_used);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Timestamp) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }
}

pub struct QueryCache<V, C: Clock = ProductionClock> {
    inner: Mutex<CacheInner<V>>,
    loads: KeyedMutex<String>,
    clock: C,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> QueryCache<V, ProductionClock> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, ProductionClock::new())
    }
}

impl<V: Clone, C: Clock> QueryCache<V, C> {
    /// A capacity of zero is raised to one
    pub fn with_clock(capacity: usize, ttl: Duration, clock: C) -> Self {
        QueryCache {
            inner: Mutex::new(CacheInner {
                entries: AHashMap::new(),
                lru: BTreeMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
            loads: KeyedMutex::new(),
            clock,
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Verify all invariants hold for this cache
    #[cfg(debug_assertions)]
    fn verify_invariants(&self, inner: &CacheInner<V>) {
        debug_assert!(
            inner.entries.len() <= self.capacity,
            "Invariant violated: {} entries but capacity is {}",
            inner.entries.len(),
            self.capacity
        );
        debug_assert_eq!(
            inner.entries.len(),
            inner.lru.len(),
            "Invariant violated: LRU index out of step with entries"
        );
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn verify_invariants(&self, _inner: &CacheInner<V>) {}

    /// Return the live value for `key`, or load, store and return it.
    ///
    /// A loader error is returned unchanged and nothing is stored, so the
    /// next call for the same key loads again.
    pub async fn get<F, Fut, E>(&self, key: &str, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let _gate = self.loads.lock(&key.to_string()).await;
        // Another caller may have filled the key while we waited
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        self.inner.lock().stats.misses += 1;
        debug!(key, "cache miss, loading");
        match loader().await {
            Ok(value) => {
                self.insert(key, value.clone());
                Ok(value)
            }
            Err(e) => {
                self.inner.lock().stats.load_failures += 1;
                debug!(key, "cache load failed, nothing stored");
                Err(e)
            }
        }
    }

    /// Live value for `key` without loading
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|e| now < e.expires_at)
            .map(|e| e.value.clone())
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => now >= entry.expires_at,
        };
        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            return None;
        }

        let tick = inner.next_tick();
        let CacheInner {
            entries,
            lru,
            stats,
            ..
        } = &mut *inner;
        let entry = entries.get_mut(key)?;
        lru.remove(&entry.last_used);
        lru.insert(tick, key.to_string());
        entry.last_used = tick;
        stats.hits += 1;
        Some(entry.value.clone())
    }

    fn insert(&self, key: &str, value: V) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        inner.remove(key);
        if inner.entries.len() >= self.capacity {
            inner.purge_expired(now);
        }
        while inner.entries.len() >= self.capacity {
            let Some((_, victim)) = inner.lru.pop_first() else {
                break;
            };
            inner.entries.remove(&victim);
            inner.stats.evictions += 1;
            debug!(key = %victim, "cache entry evicted");
        }

        let tick = inner.next_tick();
        inner.lru.insert(tick, key.to_string());
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_used: tick,
            },
        );
        self.verify_invariants(&inner);
    }

    /// Drop `key`; returns true if an entry was present
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
    }

    /// Drop every expired entry; returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().purge_expired(now)
    }

    /// Stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
