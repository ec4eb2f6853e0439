//! # Cache Layer
//!
//! The cache collaborator and the two content caches built on it.
//!
//! A cache read answers with [`Lookup`], never with a bare `Option` of a
//! possibly-empty value: `Found(vec![])` is a hit, `NotFound` is a miss.
//!
//! Cache unavailability is not an error for page delivery. The typed caches
//! ([`ModuleCache`], [`PageCache`]) log backend failures and report a miss,
//! so the pipeline recomputes instead of failing.

mod fingerprint;
mod lru;
mod memory;
mod module_cache;
mod page_cache;
mod single_flight;

pub use fingerprint::{Fingerprint, module_fingerprint, page_key};
pub use lru::{CacheStats, LruCache};
pub use memory::MemoryCache;
pub use module_cache::{CachedModule, ModuleCache};
pub use page_cache::{CachedPage, PageCache};
pub use single_flight::SingleFlight;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// =============================================================================
// LOOKUP
// =============================================================================

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    NotFound,
    Found(T),
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Found(value) => Lookup::Found(f(value)),
            Self::NotFound => Lookup::NotFound,
        }
    }
}

// =============================================================================
// LIFETIMES
// =============================================================================

/// How long a cache entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ttl {
    /// Until explicitly invalidated or evicted.
    Forever,
    Seconds(u64),
}

/// Page/module lifetime convention: 0 = never cache, negative = forever,
/// positive = seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheLifetime(pub i64);

impl CacheLifetime {
    pub const NEVER: Self = Self(0);
    pub const FOREVER: Self = Self(-1);

    /// `None` when caching is disabled.
    #[must_use]
    pub fn ttl(self) -> Option<Ttl> {
        match self.0 {
            0 => None,
            n if n < 0 => Some(Ttl::Forever),
            n => Some(Ttl::Seconds(n as u64)),
        }
    }
}

impl Default for CacheLifetime {
    fn default() -> Self {
        Self::NEVER
    }
}

// =============================================================================
// CACHE STORE
// =============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache encoding error: {0}")]
    Encoding(#[from] postcard::Error),
}

/// Shared key-value cache. Implementations must be safe to use from
/// concurrent requests without external locking.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Lookup<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), CacheError>;

    /// Store only if `key` is absent (or expired). Returns whether the
    /// value was stored.
    fn add(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<bool, CacheError>;

    fn remove(&self, key: &str) -> Result<bool, CacheError>;
}

/// Read that treats an unavailable backend as a miss.
pub(crate) fn get_or_miss(cache: &dyn CacheStore, key: &str) -> Lookup<Vec<u8>> {
    match cache.get(key) {
        Ok(lookup) => lookup,
        Err(err) => {
            warn!(key, error = %err, "cache read failed, treating as miss");
            Lookup::NotFound
        }
    }
}

/// Write that logs and swallows backend failures.
pub(crate) fn set_or_warn(cache: &dyn CacheStore, key: &str, value: Vec<u8>, ttl: Ttl) {
    if let Err(err) = cache.set(key, value, ttl) {
        warn!(key, error = %err, "cache write failed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Backend that is always down.
    #[derive(Debug, Default)]
    pub struct UnavailableCache;

    impl CacheStore for UnavailableCache {
        fn get(&self, _key: &str) -> Result<Lookup<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Ttl) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        fn add(&self, _key: &str, _value: Vec<u8>, _ttl: Ttl) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        fn remove(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }
}
