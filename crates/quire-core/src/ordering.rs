//! # Module Ordering
//!
//! Which modules a revision shows, and in what order.
//!
//! Membership: a module is visible on a revision when its origin page is on
//! the revision's ancestry chain. Modules marked `inherit = false` are only
//! visible on revisions of their own page.
//!
//! Order: the sort record of the most specific chain revision that has one
//! wins, the same rank rule overrides use. Visible modules the winning
//! record does not mention go to the bottom in id order. With no record
//! anywhere on the chain the natural (id) order is used, and the caller may
//! persist it on the requested revision.

use crate::ancestry::Ancestry;
use crate::model::{PageModule, SortEntry};
use crate::store::{ContentStore, StoreError};
use crate::{ModuleId, RevisionId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Where the order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSource {
    /// The sort record of this chain revision.
    Revision(RevisionId),
    /// No record anywhere on the chain.
    Natural,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedModules {
    pub modules: Vec<PageModule>,
    pub source: OrderSource,
}

impl OrderedModules {
    #[must_use]
    pub fn ids(&self) -> Vec<ModuleId> {
        self.modules.iter().map(|m| m.id).collect()
    }
}

/// Filter `candidates` down to those visible on the chain's leaf.
#[must_use]
pub fn visible_modules(candidates: Vec<PageModule>, ancestry: &Ancestry) -> Vec<PageModule> {
    let pages = ancestry.pages();
    let leaf_page = ancestry.leaf().map(|link| link.page);
    candidates
        .into_iter()
        .filter(|m| pages.contains(&m.page))
        .filter(|m| m.inherit || Some(m.page) == leaf_page)
        .collect()
}

/// Order `visible` (already filtered, any order) using `entries`.
#[must_use]
pub fn order_modules(
    mut visible: Vec<PageModule>,
    entries: &[SortEntry],
    ancestry: &Ancestry,
) -> OrderedModules {
    visible.sort_by_key(|m| m.id);
    let visible_ids: BTreeSet<ModuleId> = visible.iter().map(|m| m.id).collect();

    // rank -> (revision, entries for visible modules)
    let mut by_rank: BTreeMap<usize, (RevisionId, Vec<&SortEntry>)> = BTreeMap::new();
    for entry in entries.iter().filter(|e| visible_ids.contains(&e.module)) {
        if let Some(rank) = ancestry.rank(entry.revision) {
            by_rank
                .entry(rank)
                .or_insert_with(|| (entry.revision, Vec::new()))
                .1
                .push(entry);
        }
    }

    let Some((_, (revision, mut winning))) = by_rank.pop_last() else {
        return OrderedModules {
            modules: visible,
            source: OrderSource::Natural,
        };
    };

    winning.sort_by_key(|e| (e.position, e.module));
    let mut positions: BTreeMap<ModuleId, usize> = BTreeMap::new();
    for (index, entry) in winning.iter().enumerate() {
        positions.entry(entry.module).or_insert(index);
    }

    // Unlisted modules keep id order after every listed one.
    visible.sort_by_key(|m| (positions.get(&m.id).copied().unwrap_or(usize::MAX), m.id));

    OrderedModules {
        modules: visible,
        source: OrderSource::Revision(revision),
    }
}

/// Store-backed ordering for a resolved chain.
///
/// When `persist_natural` is set and no record exists, the natural order is
/// written to the chain's leaf revision. A failed write is logged and the
/// natural order is still returned.
pub fn resolve_module_order(
    store: &dyn ContentStore,
    ancestry: &Ancestry,
    persist_natural: bool,
) -> Result<OrderedModules, StoreError> {
    let candidates = store.modules_for_pages(&ancestry.pages())?;
    let visible = visible_modules(candidates, ancestry);
    let entries = store.sort_entries(&ancestry.revisions())?;
    let ordered = order_modules(visible, &entries, ancestry);

    if ordered.source == OrderSource::Natural && persist_natural && !ordered.modules.is_empty() {
        if let Some(leaf) = ancestry.leaf() {
            match store.set_sort_entries(leaf.revision, &ordered.ids()) {
                Ok(()) => debug!(revision = %leaf.revision, "recorded natural module order"),
                Err(err) => warn!(revision = %leaf.revision, error = %err, "could not record module order"),
            }
        }
    }

    Ok(ordered)
}

// =============================================================================
// TESTS
// =============================================================================
