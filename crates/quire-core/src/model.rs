//! # Content Model
//!
//! Records read from the content store. The store owns them; the engine only
//! reads, except for the narrow writes listed on [`crate::store::ContentStore`].

use crate::cache::CacheLifetime;
use crate::{Langcode, ModuleDataId, ModuleId, PageId, RevisionId, Timestamp};
use serde::{Deserialize, Serialize};

/// A node in the site tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// Tree parent. `None` only for the root.
    pub parent: Option<PageId>,
    pub name: String,
    /// Cached public URL, used for routing.
    pub url: String,
    /// Revision served by default.
    pub active_revision: Option<RevisionId>,
    /// Revision being edited.
    pub working_revision: Option<RevisionId>,
    /// Page cache lifetime; `None` falls back to the configured default.
    pub cache_lifetime: Option<CacheLifetime>,
}

impl Page {
    #[must_use]
    pub fn new(id: PageId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            parent: None,
            name: name.into(),
            url: url.into(),
            active_revision: None,
            working_revision: None,
            cache_lifetime: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: PageId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_active(mut self, revision: RevisionId) -> Self {
        self.active_revision = Some(revision);
        self
    }

    /// Pick the revision for a selector. `None` if the page has none.
    #[must_use]
    pub fn select(&self, selector: RevisionSelector) -> Option<RevisionId> {
        match selector {
            RevisionSelector::Active => self.active_revision,
            RevisionSelector::Working => self.working_revision.or(self.active_revision),
            RevisionSelector::Explicit(id) => Some(id),
        }
    }
}

/// Versioned configuration snapshot of one page.
///
/// `base_page` is an inheritance link distinct from the tree parent: the
/// active revision of the base page becomes the next link of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRevision {
    pub id: RevisionId,
    pub page: PageId,
    pub base_page: Option<PageId>,
    /// Root template composed with the slot contents.
    pub template: String,
    /// Scheduled promotion to active. Cleared once published.
    pub publish_date: Option<Timestamp>,
    pub description: String,
}

impl PageRevision {
    #[must_use]
    pub fn new(id: RevisionId, page: PageId, template: impl Into<String>) -> Self {
        Self {
            id,
            page,
            base_page: None,
            template: template.into(),
            publish_date: None,
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_base(mut self, base: PageId) -> Self {
        self.base_page = Some(base);
        self
    }

    #[must_use]
    pub fn scheduled_at(mut self, when: Timestamp) -> Self {
        self.publish_date = Some(when);
        self
    }
}

/// A module attached to a template slot.
///
/// Visible on every revision whose ancestry chain passes through a revision
/// of its origin page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageModule {
    pub id: ModuleId,
    /// Origin page.
    pub page: PageId,
    /// Target slot in the root template.
    pub target: String,
    /// Registered implementation type identifier.
    pub module_type: String,
    pub name: String,
    /// When false the module shows only on its origin page, not on pages
    /// inheriting from it.
    pub inherit: bool,
}

impl PageModule {
    #[must_use]
    pub fn new(
        id: ModuleId,
        page: PageId,
        target: impl Into<String>,
        module_type: impl Into<String>,
    ) -> Self {
        Self {
            id,
            page,
            target: target.into(),
            module_type: module_type.into(),
            name: String::new(),
            inherit: true,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.inherit = false;
        self
    }
}

/// Override record for one (module, revision, langcode).
///
/// Every field is independently optional; `None` means "not set here".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleData {
    pub id: ModuleDataId,
    pub module: ModuleId,
    pub revision: RevisionId,
    pub langcode: Langcode,
    pub template: Option<String>,
    pub enabled: Option<bool>,
    /// Serialized module state (see [`crate::registry::StoredState`]).
    pub data: Option<Vec<u8>>,
}

impl ModuleData {
    /// True when no field is set. Such a row contributes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.enabled.is_none() && self.data.is_none()
    }
}

/// Position of a module within one revision's explicit ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub module: ModuleId,
    pub revision: RevisionId,
    pub position: u32,
}

/// Which revision of a page a request wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionSelector {
    #[default]
    Active,
    /// The working revision, falling back to the active one.
    Working,
    Explicit(RevisionId),
}
