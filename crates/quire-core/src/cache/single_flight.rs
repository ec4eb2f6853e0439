//! Per-key deduplication of concurrent cache fills.
//!
//! When several requests miss the same fingerprint at once, the first one
//! computes while the rest wait, then re-read the cache. If the leader did
//! not leave a cached value (uncacheable output, failed render) a waiter
//! becomes the next leader.

use super::Lookup;
use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct SingleFlight {
    inflight: Mutex<BTreeSet<String>>,
    finished: Condvar,
}

/// Releases the key even if the computation unwinds.
struct Leader<'a> {
    flight: &'a SingleFlight,
    key: String,
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        let mut inflight = self.flight.lock();
        inflight.remove(&self.key);
        drop(inflight);
        self.flight.finished.notify_all();
    }
}

impl SingleFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // Poisoning is ignored; the set stays consistent.
        self.inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Return the cached value for `key`, computing it at most once across
    /// concurrent callers.
    ///
    /// `lookup` reads the cache; `compute` produces (and is expected to
    /// store) the value.
    pub fn run<T>(
        &self,
        key: &str,
        mut lookup: impl FnMut() -> Lookup<T>,
        compute: impl FnOnce() -> T,
    ) -> T {
        loop {
            if let Lookup::Found(value) = lookup() {
                return value;
            }

            let mut inflight = self.lock();
            if inflight.insert(key.to_string()) {
                drop(inflight);
                let _leader = Leader {
                    flight: self,
                    key: key.to_string(),
                };
                // A previous leader may have finished between our read and
                // taking the key.
                if let Lookup::Found(value) = lookup() {
                    return value;
                }
                return compute();
            }

            while inflight.contains(key) {
                inflight = self
                    .finished
                    .wait(inflight)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }
    }

    /// Keys currently being computed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
