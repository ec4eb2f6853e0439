//! # LRU Cache
//!
//! Capacity-bounded map with least-recently-used eviction.
//!
//! Recency is tracked with a logical clock (a monotonic counter), not wall
//! time, so eviction order is deterministic. Expiry is the caller's concern:
//! [`super::MemoryCache`] stores the deadline inside the value.

use std::collections::BTreeMap;

/// Default eviction batch size (number of entries to evict at once).
pub const DEFAULT_EVICTION_BATCH: usize = 16;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    last_access: u64,
}

/// LRU map keyed by `K`.
#[derive(Debug)]
pub struct LruCache<K: Ord + Clone, V> {
    entries: BTreeMap<K, Slot<V>>,
    max_size: usize,
    eviction_batch: usize,
    logical_clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Ord + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `max_size` entries (at least 1).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_size: max_size.max(1),
            eviction_batch: DEFAULT_EVICTION_BATCH,
            logical_clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    #[must_use]
    pub fn with_eviction_batch(mut self, batch_size: usize) -> Self {
        self.eviction_batch = batch_size.max(1);
        self
    }

    fn tick(&mut self) -> u64 {
        self.logical_clock = self.logical_clock.saturating_add(1);
        self.logical_clock
    }

    /// Get a value and mark it recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = self.tick();
        match self.entries.get_mut(key) {
            Some(slot) => {
                slot.last_access = now;
                self.hits = self.hits.saturating_add(1);
                Some(&slot.value)
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                None
            }
        }
    }

    /// Get a value without touching recency or statistics.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace. Evicts a batch of least recently used entries
    /// when a new key arrives at capacity.
    pub fn insert(&mut self, key: K, value: V) {
        let now = self.tick();
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            self.evict();
        }
        self.entries.insert(
            key,
            Slot {
                value,
                last_access: now,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    /// Drop every entry for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|k, slot| keep(k, &slot.value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let total = self.hits.saturating_add(self.misses);
        let hit_rate_percent = if total == 0 {
            0
        } else {
            (self.hits.saturating_mul(100) / total) as u8
        };
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate_percent,
        }
    }

    fn evict(&mut self) {
        let to_evict = self.eviction_batch.min(self.entries.len());
        let mut by_access: Vec<(u64, K)> = self
            .entries
            .iter()
            .map(|(k, slot)| (slot.last_access, k.clone()))
            .collect();
        by_access.sort_by_key(|(access, _)| *access);

        for (_, key) in by_access.into_iter().take(to_evict) {
            self.entries.remove(&key);
            self.evictions = self.evictions.saturating_add(1);
        }
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Integer percentage (0-100).
    pub hit_rate_percent: u8,
}

// =============================================================================
// TESTS
// =============================================================================
