use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::utils::clock::Clock;

/// One immutable write. A new write for the same key replaces it wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    pub fetched_at: u64,
    pub stale_at: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(key: String, data: T, fetched_at: u64, ttl: Duration) -> Self {
        Self {
            key,
            data,
            fetched_at,
            stale_at: fetched_at.saturating_add(ttl.as_millis() as u64),
        }
    }

    pub fn is_stale_at(&self, now_ms: u64) -> bool {
        now_ms > self.stale_at
    }
}

/// Read view returned to callers; stale values are still served.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRead<T> {
    pub data: T,
    pub is_stale: bool,
    pub fetched_at: u64,
}

impl<T> CacheRead<T> {
    pub fn into_data(self) -> T {
        self.data
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead { data: f(self.data), is_stale: self.is_stale, fetched_at: self.fetched_at }
    }
}

#[derive(Debug)]
struct Slot<T> {
    entry: CacheEntry<T>,
    last_access: AtomicU64,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) + self.stale_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Key → entry map with TTL-based staleness and a capacity bound.
///
/// Staleness never evicts: `get` keeps returning the value with `is_stale`
/// set. Eviction only happens when an insert pushes the map past
/// `capacity`, and then the least recently touched entry goes first.
#[derive(Debug)]
pub struct CacheStore<T> {
    entries: DashMap<String, Slot<T>>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    // Logical access counter; only ordering matters.
    tick: AtomicU64,
    pub stats: CacheStats,
}

impl<T: Clone> CacheStore<T> {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            capacity: capacity.max(1),
            tick: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn get(&self, key: &str) -> Option<CacheRead<T>> {
        let Some(slot) = self.entries.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        slot.last_access.store(self.next_tick(), Ordering::Relaxed);
        let is_stale = slot.entry.is_stale_at(self.clock.now_ms());
        if is_stale {
            self.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        Some(CacheRead { data: slot.entry.data.clone(), is_stale, fetched_at: slot.entry.fetched_at })
    }

    /// Copy of the full entry, without touching recency or stats.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn set(&self, key: &str, data: T, ttl: Duration) {
        let now = self.clock.now_ms();
        self.insert(CacheEntry::new(key.to_string(), data, now, ttl));
    }

    /// Writes an entry that was fetched earlier, e.g. from a durable snapshot.
    pub fn restore(&self, key: &str, data: T, fetched_at: u64, ttl: Duration) {
        self.insert(CacheEntry::new(key.to_string(), data, fetched_at, ttl));
    }

    fn insert(&self, entry: CacheEntry<T>) {
        let key = entry.key.clone();
        let slot = Slot { entry, last_access: AtomicU64::new(self.next_tick()) };
        self.entries.insert(key, slot);
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|slot| slot.last_access.load(Ordering::Relaxed))
                .map(|slot| slot.key().clone());
            let Some(victim) = victim else { break };
            self.entries.remove(&victim);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim, "evicted least recently used cache entry");
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every key starting with `prefix`; returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
