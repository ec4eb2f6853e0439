//! # Auto-Publish Scheduler
//!
//! Lazily promotes scheduled revisions.
//!
//! A sentinel cache entry means "nothing to do until it expires". On a
//! miss, one caller scans the scheduled revisions in date order, promotes
//! every one that is due, and re-arms the sentinel with the time until the
//! next pending date (or the configured interval when nothing is pending).
//!
//! Concurrent misses are gated twice: an in-process mutex, and a lock key
//! taken with [`CacheStore::add`] so separate processes sharing a cache do
//! not double-promote. If a pass fails the sentinel is not written and the
//! lock is left to expire, so the next request after the lock TTL retries.

use crate::cache::{CacheStore, Lookup, Ttl, get_or_miss, set_or_warn};
use crate::context::GenerationContext;
use crate::store::StoreError;
use crate::{RevisionId, Timestamp};
use std::sync::{Mutex, TryLockError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cache key of the "next check" sentinel.
pub const SENTINEL_KEY: &str = "publish:next-check";

/// Cache key held while a pass runs.
pub const LOCK_KEY: &str = "publish:lock";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Promoted revisions, in publish-date order.
    pub published: Vec<RevisionId>,
    /// Sentinel lifetime written after the pass.
    pub next_check_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishCheck {
    /// Sentinel present.
    NotDue,
    /// Another caller is running a pass.
    Busy,
    Ran(PublishReport),
}

#[derive(Debug, Default)]
pub struct AutoPublishScheduler {
    running: Mutex<()>,
}

impl AutoPublishScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request-path gate: O(1) unless the sentinel has expired.
    pub fn check(&self, ctx: &GenerationContext) -> Result<PublishCheck, PublishError> {
        if get_or_miss(ctx.cache.as_ref(), SENTINEL_KEY).is_found() {
            return Ok(PublishCheck::NotDue);
        }
        self.guarded(ctx, true)
    }

    /// Run a pass now, ignoring the sentinel.
    pub fn run(&self, ctx: &GenerationContext) -> Result<PublishCheck, PublishError> {
        self.guarded(ctx, false)
    }

    fn guarded(&self, ctx: &GenerationContext, recheck: bool) -> Result<PublishCheck, PublishError> {
        let _running = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(PublishCheck::Busy),
        };

        let cache = ctx.cache.as_ref();
        // A pass that finished while we waited for the mutex re-armed it.
        if recheck && get_or_miss(cache, SENTINEL_KEY).is_found() {
            return Ok(PublishCheck::NotDue);
        }

        let lock_ttl = Ttl::Seconds(ctx.config.publish_lock_secs.max(1));
        let owns_lock = match cache.add(LOCK_KEY, Vec::new(), lock_ttl) {
            Ok(true) => true,
            Ok(false) => {
                debug!("publish lock held elsewhere");
                return Ok(PublishCheck::Busy);
            }
            Err(err) => {
                warn!(error = %err, "publish lock unavailable, relying on process lock");
                false
            }
        };

        let report = publish_due(ctx)?;

        let next_check_at = ctx.clock.now().saturating_add(report.next_check_in);
        set_or_warn(
            cache,
            SENTINEL_KEY,
            next_check_at.to_le_bytes().to_vec(),
            Ttl::Seconds(report.next_check_in),
        );
        if owns_lock {
            release_lock(cache);
        }
        Ok(PublishCheck::Ran(report))
    }
}

fn release_lock(cache: &dyn CacheStore) {
    if let Err(err) = cache.remove(LOCK_KEY) {
        warn!(error = %err, "could not release publish lock");
    }
}

/// Promote every revision whose date has passed; stop at the first future
/// one. A revision whose page is gone is skipped and stays scheduled.
fn publish_due(ctx: &GenerationContext) -> Result<PublishReport, PublishError> {
    let now: Timestamp = ctx.clock.now();
    let mut published = Vec::new();
    let mut next_pending = None;

    for revision in ctx.store.scheduled_revisions()? {
        let Some(date) = revision.publish_date else {
            continue;
        };
        if date > now {
            next_pending = Some(date - now);
            break;
        }
        match ctx.store.promote_revision(revision.id) {
            Ok(()) => {}
            Err(err @ (StoreError::PageNotFound(_) | StoreError::RevisionNotFound(_))) => {
                warn!(
                    revision = %revision.id,
                    page = %revision.page,
                    error = %err,
                    "skipping unpublishable revision"
                );
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        info!(revision = %revision.id, page = %revision.page, publish_date = date, "revision published");
        published.push(revision.id);
    }

    let next_check_in = next_pending.unwrap_or(ctx.config.publish_check_interval_secs);
    debug!(published = published.len(), next_check_in, "publish pass finished");
    Ok(PublishReport {
        published,
        next_check_in,
    })
}

/// When the armed sentinel says the next scan is due.
#[must_use]
pub fn next_check_at(cache: &dyn CacheStore) -> Option<Timestamp> {
    match get_or_miss(cache, SENTINEL_KEY) {
        Lookup::Found(bytes) => bytes.try_into().ok().map(Timestamp::from_le_bytes),
        Lookup::NotFound => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::cache::testing::UnavailableCache;
    use crate::clock::ManualClock;
    use crate::model::{Page, PageRevision};
    use crate::registry::ModuleRegistry;
    use crate::store::{ContentStore, MemoryStore};
    use crate::template::MemoryTemplates;
    use crate::PageId;
    use std::sync::Arc;

    const NOW: Timestamp = 1_000_000;

    struct Fixture {
        ctx: GenerationContext,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(cache: Option<Arc<dyn CacheStore>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let cache: Arc<dyn CacheStore> = match cache {
            Some(cache) => cache,
            None => Arc::new(MemoryCache::new(64, clock.clone())),
        };
        let ctx = GenerationContext::new(
            store.clone(),
            cache,
            Arc::new(MemoryTemplates::new()),
            Arc::new(ModuleRegistry::new()),
            clock.clone(),
        );
        store
            .insert_page(Page::new(PageId(1), "home", "/").with_active(RevisionId(1)))
            .unwrap();
        store
            .insert_revision(PageRevision::new(RevisionId(1), PageId(1), "root"))
            .unwrap();
        for (id, date) in [(2, NOW - 10), (3, NOW + 5), (4, NOW + 100)] {
            store
                .insert_revision(PageRevision::new(RevisionId(id), PageId(1), "root").scheduled_at(date))
                .unwrap();
        }
        Fixture { ctx, store, clock }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn active(store: &MemoryStore) -> Option<RevisionId> {
        store.page(PageId(1)).unwrap().unwrap().active_revision
    }

    #[test]
    fn publishes_due_revisions_and_arms_sentinel() {
        let f = fixture();
        let scheduler = AutoPublishScheduler::new();

        let first = scheduler.check(&f.ctx).unwrap();
        assert_eq!(
            first,
            PublishCheck::Ran(PublishReport {
                published: vec![RevisionId(2)],
                next_check_in: 5,
            })
        );
        assert_eq!(active(&f.store), Some(RevisionId(2)));
        assert_eq!(next_check_at(f.ctx.cache.as_ref()), Some(NOW + 5));

        f.clock.advance(5);
        let second = scheduler.check(&f.ctx).unwrap();
        assert_eq!(
            second,
            PublishCheck::Ran(PublishReport {
                published: vec![RevisionId(3)],
                next_check_in: 95,
            })
        );
        assert_eq!(active(&f.store), Some(RevisionId(3)));
    }

    #[test]
    fn sentinel_gates_the_scan() {
        let f = fixture();
        let scheduler = AutoPublishScheduler::new();
        scheduler.check(&f.ctx).unwrap();

        f.clock.advance(4);
        assert_eq!(scheduler.check(&f.ctx).unwrap(), PublishCheck::NotDue);
        assert_eq!(active(&f.store), Some(RevisionId(2)));
    }

    #[test]
    fn default_interval_when_nothing_pending() {
        let f = fixture();
        f.clock.advance(1_000);
        let scheduler = AutoPublishScheduler::new();
        let PublishCheck::Ran(report) = scheduler.check(&f.ctx).unwrap() else {
            panic!("expected a pass");
        };
        assert_eq!(report.published, vec![RevisionId(2), RevisionId(3), RevisionId(4)]);
        assert_eq!(report.next_check_in, f.ctx.config.publish_check_interval_secs);
        assert_eq!(active(&f.store), Some(RevisionId(4)));
    }

    #[test]
    fn foreign_lock_reports_busy() {
        let f = fixture();
        f.ctx
            .cache
            .add(LOCK_KEY, Vec::new(), Ttl::Seconds(30))
            .unwrap();
        let scheduler = AutoPublishScheduler::new();
        assert_eq!(scheduler.check(&f.ctx).unwrap(), PublishCheck::Busy);
        assert_eq!(active(&f.store), Some(RevisionId(1)));
    }

    #[test]
    fn forced_run_ignores_sentinel() {
        let f = fixture();
        f.ctx
            .cache
            .set(SENTINEL_KEY, Vec::new(), Ttl::Seconds(1_000))
            .unwrap();
        let scheduler = AutoPublishScheduler::new();
        assert_eq!(scheduler.check(&f.ctx).unwrap(), PublishCheck::NotDue);

        let forced = scheduler.run(&f.ctx).unwrap();
        assert!(matches!(forced, PublishCheck::Ran(ref r) if r.published == vec![RevisionId(2)]));
    }

    #[test]
    fn orphaned_revision_does_not_block_later_ones() {
        let f = fixture();
        f.store
            .insert_revision(PageRevision::new(RevisionId(9), PageId(77), "root").scheduled_at(NOW - 20))
            .unwrap();
        let scheduler = AutoPublishScheduler::new();

        let PublishCheck::Ran(report) = scheduler.check(&f.ctx).unwrap() else {
            panic!("expected a pass");
        };
        assert_eq!(report.published, vec![RevisionId(2)]);
        assert_eq!(active(&f.store), Some(RevisionId(2)));
        assert!(
            f.store
                .scheduled_revisions()
                .unwrap()
                .iter()
                .any(|r| r.id == RevisionId(9))
        );
    }

    #[test]
    fn unavailable_cache_still_publishes() {
        let f = fixture_with(Some(Arc::new(UnavailableCache)));
        let scheduler = AutoPublishScheduler::new();
        let PublishCheck::Ran(report) = scheduler.check(&f.ctx).unwrap() else {
            panic!("expected a pass");
        };
        assert_eq!(report.published, vec![RevisionId(2)]);
        // no sentinel could be stored: the next request scans again
        assert!(matches!(scheduler.check(&f.ctx).unwrap(), PublishCheck::Ran(_)));
    }
}
