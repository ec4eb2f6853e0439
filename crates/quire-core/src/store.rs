//! # Content Store
//!
//! The persistence boundary of the engine.
//!
//! Reads cover every record kind. Writes are deliberately narrow: override
//! rows, sort entries, and revision promotion. The `insert_*` seeding methods
//! exist for import tooling and tests.
//!
//! [`MemoryStore`] keeps everything in `BTreeMap`s behind one `RwLock`;
//! [`crate::storage::RedbStore`] is the durable implementation.

use crate::model::{ModuleData, Page, PageModule, PageRevision, SortEntry};
use crate::{Langcode, ModuleDataId, ModuleId, PageId, RevisionId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("revision {0} not found")]
    RevisionNotFound(RevisionId),

    #[error("module {0} not found")]
    ModuleNotFound(ModuleId),

    #[error("store lock poisoned")]
    Poisoned,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Full replacement values for an override row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideFields {
    pub template: Option<String>,
    pub enabled: Option<bool>,
    pub data: Option<Vec<u8>>,
}

impl OverrideFields {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.enabled.is_none() && self.data.is_none()
    }
}

pub trait ContentStore: Send + Sync {
    fn page(&self, id: PageId) -> Result<Option<Page>, StoreError>;

    fn page_by_url(&self, url: &str) -> Result<Option<Page>, StoreError>;

    fn revision(&self, id: RevisionId) -> Result<Option<PageRevision>, StoreError>;

    fn module(&self, id: ModuleId) -> Result<Option<PageModule>, StoreError>;

    /// Modules originating on any of `pages`, in insertion (id) order.
    fn modules_for_pages(&self, pages: &BTreeSet<PageId>) -> Result<Vec<PageModule>, StoreError>;

    /// All override rows of a module, in insertion (id) order.
    fn module_data(&self, module: ModuleId) -> Result<Vec<ModuleData>, StoreError>;

    /// Sort entries recorded on any of `revisions`.
    fn sort_entries(&self, revisions: &BTreeSet<RevisionId>) -> Result<Vec<SortEntry>, StoreError>;

    /// Revisions with a publish date, ascending by (date, id).
    fn scheduled_revisions(&self) -> Result<Vec<PageRevision>, StoreError>;

    /// Insert or replace the row keyed by (module, revision, langcode).
    /// An existing row keeps its id.
    fn upsert_module_data(
        &self,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
        fields: OverrideFields,
    ) -> Result<ModuleData, StoreError>;

    fn remove_module_data(&self, id: ModuleDataId) -> Result<bool, StoreError>;

    /// Replace the ordering recorded on `revision`.
    fn set_sort_entries(&self, revision: RevisionId, modules: &[ModuleId]) -> Result<(), StoreError>;

    /// Make `revision` the active revision of its page and clear its
    /// publish date.
    fn promote_revision(&self, revision: RevisionId) -> Result<(), StoreError>;

    fn insert_page(&self, page: Page) -> Result<(), StoreError>;

    fn insert_revision(&self, revision: PageRevision) -> Result<(), StoreError>;

    fn insert_module(&self, module: PageModule) -> Result<(), StoreError>;

    /// Number of read queries served so far. Used by development-mode
    /// profiling; stores that do not count return 0.
    fn query_count(&self) -> u64 {
        0
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    pages: BTreeMap<PageId, Page>,
    revisions: BTreeMap<RevisionId, PageRevision>,
    modules: BTreeMap<ModuleId, PageModule>,
    module_data: BTreeMap<ModuleDataId, ModuleData>,
    /// (revision, module) -> position
    sort_entries: BTreeMap<(RevisionId, ModuleId), u32>,
    next_module_data: u64,
}

/// In-memory content store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    queries: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl ContentStore for MemoryStore {
    fn page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        Ok(self.read()?.pages.get(&id).cloned())
    }

    fn page_by_url(&self, url: &str) -> Result<Option<Page>, StoreError> {
        Ok(self.read()?.pages.values().find(|p| p.url == url).cloned())
    }

    fn revision(&self, id: RevisionId) -> Result<Option<PageRevision>, StoreError> {
        Ok(self.read()?.revisions.get(&id).cloned())
    }

    fn module(&self, id: ModuleId) -> Result<Option<PageModule>, StoreError> {
        Ok(self.read()?.modules.get(&id).cloned())
    }

    fn modules_for_pages(&self, pages: &BTreeSet<PageId>) -> Result<Vec<PageModule>, StoreError> {
        Ok(self
            .read()?
            .modules
            .values()
            .filter(|m| pages.contains(&m.page))
            .cloned()
            .collect())
    }

    fn module_data(&self, module: ModuleId) -> Result<Vec<ModuleData>, StoreError> {
        Ok(self
            .read()?
            .module_data
            .values()
            .filter(|row| row.module == module)
            .cloned()
            .collect())
    }

    fn sort_entries(&self, revisions: &BTreeSet<RevisionId>) -> Result<Vec<SortEntry>, StoreError> {
        let tables = self.read()?;
        let mut entries = Vec::new();
        for &revision in revisions {
            let range = (revision, ModuleId(0))..=(revision, ModuleId(u64::MAX));
            for (&(revision, module), &position) in tables.sort_entries.range(range) {
                entries.push(SortEntry {
                    module,
                    revision,
                    position,
                });
            }
        }
        Ok(entries)
    }

    fn scheduled_revisions(&self) -> Result<Vec<PageRevision>, StoreError> {
        let mut scheduled: Vec<PageRevision> = self
            .read()?
            .revisions
            .values()
            .filter(|r| r.publish_date.is_some())
            .cloned()
            .collect();
        scheduled.sort_by_key(|r| (r.publish_date, r.id));
        Ok(scheduled)
    }

    fn upsert_module_data(
        &self,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
        fields: OverrideFields,
    ) -> Result<ModuleData, StoreError> {
        let mut tables = self.write()?;
        let existing = tables
            .module_data
            .values()
            .find(|row| row.module == module && row.revision == revision && &row.langcode == langcode)
            .map(|row| row.id);

        let id = match existing {
            Some(id) => id,
            None => {
                tables.next_module_data = tables.next_module_data.saturating_add(1);
                ModuleDataId(tables.next_module_data)
            }
        };

        let row = ModuleData {
            id,
            module,
            revision,
            langcode: langcode.clone(),
            template: fields.template,
            enabled: fields.enabled,
            data: fields.data,
        };
        tables.module_data.insert(id, row.clone());
        Ok(row)
    }

    fn remove_module_data(&self, id: ModuleDataId) -> Result<bool, StoreError> {
        Ok(self.write()?.module_data.remove(&id).is_some())
    }

    fn set_sort_entries(&self, revision: RevisionId, modules: &[ModuleId]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.sort_entries.retain(|(rev, _), _| *rev != revision);
        for (position, &module) in modules.iter().enumerate() {
            tables
                .sort_entries
                .insert((revision, module), position as u32);
        }
        Ok(())
    }

    fn promote_revision(&self, revision: RevisionId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let page_id = tables
            .revisions
            .get(&revision)
            .ok_or(StoreError::RevisionNotFound(revision))?
            .page;
        let page = tables
            .pages
            .get_mut(&page_id)
            .ok_or(StoreError::PageNotFound(page_id))?;
        page.active_revision = Some(revision);
        if let Some(rev) = tables.revisions.get_mut(&revision) {
            rev.publish_date = None;
        }
        Ok(())
    }

    fn insert_page(&self, page: Page) -> Result<(), StoreError> {
        self.write()?.pages.insert(page.id, page);
        Ok(())
    }

    fn insert_revision(&self, revision: PageRevision) -> Result<(), StoreError> {
        self.write()?.revisions.insert(revision.id, revision);
        Ok(())
    }

    fn insert_module(&self, module: PageModule) -> Result<(), StoreError> {
        self.write()?.modules.insert(module.id, module);
        Ok(())
    }

    fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
