//! Rendered module output, keyed by [`super::module_fingerprint`].

use super::fingerprint::Fingerprint;
use super::{CacheStore, Lookup, Ttl, get_or_miss, set_or_warn};
use crate::effects::EffectLog;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What a module render produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedModule {
    pub content: String,
    pub effects: EffectLog,
}

/// Typed view over a [`CacheStore`] for module output.
pub struct ModuleCache<'a> {
    store: &'a dyn CacheStore,
}

impl<'a> ModuleCache<'a> {
    #[must_use]
    pub fn new(store: &'a dyn CacheStore) -> Self {
        Self { store }
    }

    /// Backend failures and undecodable entries read as a miss.
    #[must_use]
    pub fn lookup(&self, key: &Fingerprint) -> Lookup<CachedModule> {
        match get_or_miss(self.store, key.as_str()) {
            Lookup::Found(bytes) => match postcard::from_bytes::<CachedModule>(&bytes) {
                Ok(entry) => {
                    debug!(key = %key, "module cache hit");
                    Lookup::Found(entry)
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "discarding undecodable module cache entry");
                    Lookup::NotFound
                }
            },
            Lookup::NotFound => {
                debug!(key = %key, "module cache miss");
                Lookup::NotFound
            }
        }
    }

    pub fn store(&self, key: &Fingerprint, entry: &CachedModule, ttl: Ttl) {
        match postcard::to_stdvec(entry) {
            Ok(bytes) => set_or_warn(self.store, key.as_str(), bytes, ttl),
            Err(err) => warn!(key = %key, error = %err, "module cache entry not encodable"),
        }
    }

    /// Explicit invalidation. Returns whether an entry was present.
    pub fn invalidate(&self, key: &Fingerprint) -> bool {
        match self.store.remove(key.as_str()) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(key = %key, error = %err, "module cache invalidation failed");
                false
            }
        }
    }
}
