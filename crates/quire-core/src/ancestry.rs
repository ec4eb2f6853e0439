//! # Ancestry
//!
//! The inheritance chain of a page revision.
//!
//! A revision inherits from the active revision of its `base_page`, which in
//! turn may inherit from its own base page, and so on. The chain is ranked
//! from the most distant ancestor (rank 0) to the revision itself
//! (rank `len - 1`); a higher rank is more specific.
//!
//! Chains are bounded: a revisit of any revision is reported as a cycle, and
//! walks longer than the configured depth are rejected.

use crate::model::PageRevision;
use crate::store::{ContentStore, StoreError};
use crate::{PageId, RevisionId};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AncestryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("revision {revision} inherits from missing page {base}")]
    MissingBasePage { revision: RevisionId, base: PageId },

    #[error("base page {0} has no active revision")]
    NoActiveRevision(PageId),

    #[error("revision {0} not found")]
    MissingRevision(RevisionId),

    #[error("base page cycle through revision {0}")]
    Cycle(RevisionId),

    #[error("ancestry deeper than {0} links")]
    TooDeep(usize),
}

/// One link of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub revision: RevisionId,
    pub page: PageId,
}

/// A ranked inheritance chain, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestry {
    links: Vec<ChainLink>,
    ranks: BTreeMap<RevisionId, usize>,
}

impl Ancestry {
    /// Build from links ordered root first. The last link is the revision
    /// the chain was resolved for.
    #[must_use]
    pub fn from_links(links: Vec<ChainLink>) -> Self {
        let ranks = links
            .iter()
            .enumerate()
            .map(|(rank, link)| (link.revision, rank))
            .collect();
        Self { links, ranks }
    }

    /// Rank of a revision, `None` if it is not on the chain.
    #[must_use]
    pub fn rank(&self, revision: RevisionId) -> Option<usize> {
        self.ranks.get(&revision).copied()
    }

    #[must_use]
    pub fn ranks(&self) -> &BTreeMap<RevisionId, usize> {
        &self.ranks
    }

    #[must_use]
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// The most specific link (the revision itself).
    #[must_use]
    pub fn leaf(&self) -> Option<ChainLink> {
        self.links.last().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub fn pages(&self) -> BTreeSet<PageId> {
        self.links.iter().map(|l| l.page).collect()
    }

    #[must_use]
    pub fn revisions(&self) -> BTreeSet<RevisionId> {
        self.ranks.keys().copied().collect()
    }
}

/// Walks BasePage links through a content store.
pub struct AncestryResolver<'a> {
    store: &'a dyn ContentStore,
    max_depth: usize,
}

impl<'a> AncestryResolver<'a> {
    #[must_use]
    pub fn new(store: &'a dyn ContentStore, max_depth: usize) -> Self {
        Self {
            store,
            max_depth: max_depth.max(1),
        }
    }

    /// Resolve the chain of `revision`, including the revision itself.
    pub fn resolve(&self, revision: &PageRevision) -> Result<Ancestry, AncestryError> {
        let mut chain = vec![ChainLink {
            revision: revision.id,
            page: revision.page,
        }];
        let mut seen = BTreeSet::from([revision.id]);
        let mut current = revision.clone();

        while let Some(base) = current.base_page {
            if chain.len() >= self.max_depth {
                return Err(AncestryError::TooDeep(self.max_depth));
            }

            let base_page = self
                .store
                .page(base)?
                .ok_or(AncestryError::MissingBasePage {
                    revision: current.id,
                    base,
                })?;
            let base_revision = base_page
                .active_revision
                .ok_or(AncestryError::NoActiveRevision(base))?;

            if !seen.insert(base_revision) {
                return Err(AncestryError::Cycle(base_revision));
            }

            current = self
                .store
                .revision(base_revision)?
                .ok_or(AncestryError::MissingRevision(base_revision))?;
            chain.push(ChainLink {
                revision: current.id,
                page: current.page,
            });
        }

        chain.reverse();
        Ok(Ancestry::from_links(chain))
    }

    /// Resolve by id.
    pub fn resolve_id(&self, revision: RevisionId) -> Result<Ancestry, AncestryError> {
        let revision = self
            .store
            .revision(revision)?
            .ok_or(AncestryError::MissingRevision(revision))?;
        self.resolve(&revision)
    }
}

// =============================================================================
// TESTS
// =============================================================================
