//! Whole-page responses keyed by request path and query.
//!
//! Only safe requests are eligible, and only when the page's
//! [`CacheLifetime`] allows caching. Entries are never invalidated on
//! content edits; they age out by TTL.

use super::fingerprint::{Fingerprint, page_key};
use super::{CacheLifetime, CacheStore, Lookup, Ttl, get_or_miss, set_or_warn};
use crate::{PageId, RevisionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A stored response, emitted verbatim on a hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPage {
    pub page: PageId,
    pub revision: RevisionId,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

pub struct PageCache<'a> {
    store: &'a dyn CacheStore,
}

impl<'a> PageCache<'a> {
    #[must_use]
    pub fn new(store: &'a dyn CacheStore) -> Self {
        Self { store }
    }

    /// TTL for a request, or `None` if it must not be cached.
    #[must_use]
    pub fn eligibility(safe_request: bool, lifetime: CacheLifetime) -> Option<Ttl> {
        if !safe_request {
            return None;
        }
        lifetime.ttl()
    }

    #[must_use]
    pub fn key(path_and_query: &str) -> Fingerprint {
        page_key(path_and_query)
    }

    #[must_use]
    pub fn lookup(&self, path_and_query: &str) -> Lookup<CachedPage> {
        let key = Self::key(path_and_query);
        match get_or_miss(self.store, key.as_str()) {
            Lookup::Found(bytes) => match postcard::from_bytes::<CachedPage>(&bytes) {
                Ok(page) => {
                    debug!(path = path_and_query, "page cache hit");
                    Lookup::Found(page)
                }
                Err(err) => {
                    warn!(path = path_and_query, error = %err, "discarding undecodable page cache entry");
                    Lookup::NotFound
                }
            },
            Lookup::NotFound => Lookup::NotFound,
        }
    }

    pub fn store(&self, path_and_query: &str, page: &CachedPage, ttl: Ttl) {
        let key = Self::key(path_and_query);
        match postcard::to_stdvec(page) {
            Ok(bytes) => set_or_warn(self.store, key.as_str(), bytes, ttl),
            Err(err) => warn!(path = path_and_query, error = %err, "page cache entry not encodable"),
        }
    }
}
