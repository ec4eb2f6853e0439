//! In-process [`CacheStore`] with per-entry expiry.

use super::lru::{CacheStats, LruCache};
use super::{CacheError, CacheStore, Lookup, Ttl};
use crate::Timestamp;
use crate::clock::Clock;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Expiring {
    value: Vec<u8>,
    /// `None` lives until evicted or removed.
    expires_at: Option<Timestamp>,
}

impl Expiring {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// LRU-bounded cache whose entries expire against an injected clock.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Expiring>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Expiring>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".into()))
    }

    fn deadline(&self, ttl: Ttl) -> Option<Timestamp> {
        match ttl {
            Ttl::Forever => None,
            Ttl::Seconds(secs) => Some(self.clock.now().saturating_add(secs)),
        }
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) -> Result<(), CacheError> {
        let now = self.clock.now();
        self.lock()?.retain(|_, entry| entry.is_live(now));
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.lock()?.stats())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.clear();
        Ok(())
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Lookup<Vec<u8>>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let key = key.to_string();
        match entries.get(&key) {
            Some(entry) if entry.is_live(now) => return Ok(Lookup::Found(entry.value.clone())),
            Some(_) => {}
            None => return Ok(Lookup::NotFound),
        }
        // expired
        entries.remove(&key);
        Ok(Lookup::NotFound)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), CacheError> {
        let expires_at = self.deadline(ttl);
        self.lock()?
            .insert(key.to_string(), Expiring { value, expires_at });
        Ok(())
    }

    fn add(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<bool, CacheError> {
        let now = self.clock.now();
        let expires_at = self.deadline(ttl);
        let mut entries = self.lock()?;
        let key = key.to_string();
        if entries.peek(&key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key, Expiring { value, expires_at });
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.remove(&key.to_string()).is_some())
    }
}
