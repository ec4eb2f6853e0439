//! redb tables, one per record kind.
//!
//! Records are postcard-encoded and keyed by their `u64` id. Sort entries
//! use a `(revision, module)` tuple key so one revision's order is a single
//! contiguous range.

use crate::model::{ModuleData, Page, PageModule, PageRevision, SortEntry};
use crate::store::{ContentStore, OverrideFields, StoreError};
use crate::{Langcode, ModuleDataId, ModuleId, PageId, RevisionId};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const PAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("pages");
const REVISIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("revisions");
const MODULES: TableDefinition<u64, &[u8]> = TableDefinition::new("modules");
const MODULE_DATA: TableDefinition<u64, &[u8]> = TableDefinition::new("module_data");
const SORT_ENTRIES: TableDefinition<(u64, u64), u32> = TableDefinition::new("sort_entries");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_MODULE_DATA: &str = "next_module_data";

macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    StoreError::Backend(err.to_string())
                }
            }
        )*
    };
}

backend_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(postcard::to_stdvec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Content store persisted in a single redb file.
pub struct RedbStore {
    db: Database,
    queries: AtomicU64,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(PAGES)?;
            write_txn.open_table(REVISIONS)?;
            write_txn.open_table(MODULES)?;
            write_txn.open_table(MODULE_DATA)?;
            write_txn.open_table(SORT_ENTRIES)?;
            write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            queries: AtomicU64::new(0),
        })
    }

    fn get_record<T: DeserializeOwned>(
        &self,
        table: TableDefinition<u64, &[u8]>,
        id: u64,
    ) -> Result<Option<T>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Every record of a table, in key order.
    fn scan<T: DeserializeOwned>(&self, table: TableDefinition<u64, &[u8]>) -> Result<Vec<T>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, bytes) = entry?;
            records.push(decode(bytes.value())?);
        }
        Ok(records)
    }

    fn put_record<T: Serialize>(
        &self,
        table: TableDefinition<u64, &[u8]>,
        id: u64,
        record: &T,
    ) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl ContentStore for RedbStore {
    fn page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        self.get_record(PAGES, id.0)
    }

    fn page_by_url(&self, url: &str) -> Result<Option<Page>, StoreError> {
        Ok(self
            .scan::<Page>(PAGES)?
            .into_iter()
            .find(|page| page.url == url))
    }

    fn revision(&self, id: RevisionId) -> Result<Option<PageRevision>, StoreError> {
        self.get_record(REVISIONS, id.0)
    }

    fn module(&self, id: ModuleId) -> Result<Option<PageModule>, StoreError> {
        self.get_record(MODULES, id.0)
    }

    fn modules_for_pages(&self, pages: &BTreeSet<PageId>) -> Result<Vec<PageModule>, StoreError> {
        Ok(self
            .scan::<PageModule>(MODULES)?
            .into_iter()
            .filter(|module| pages.contains(&module.page))
            .collect())
    }

    fn module_data(&self, module: ModuleId) -> Result<Vec<ModuleData>, StoreError> {
        Ok(self
            .scan::<ModuleData>(MODULE_DATA)?
            .into_iter()
            .filter(|row| row.module == module)
            .collect())
    }

    fn sort_entries(&self, revisions: &BTreeSet<RevisionId>) -> Result<Vec<SortEntry>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SORT_ENTRIES)?;
        let mut entries = Vec::new();
        for revision in revisions {
            for entry in table.range((revision.0, 0)..=(revision.0, u64::MAX))? {
                let (key, position) = entry?;
                let (revision, module) = key.value();
                entries.push(SortEntry {
                    module: ModuleId(module),
                    revision: RevisionId(revision),
                    position: position.value(),
                });
            }
        }
        Ok(entries)
    }

    fn scheduled_revisions(&self) -> Result<Vec<PageRevision>, StoreError> {
        let mut scheduled: Vec<PageRevision> = self
            .scan::<PageRevision>(REVISIONS)?
            .into_iter()
            .filter(|revision| revision.publish_date.is_some())
            .collect();
        scheduled.sort_by_key(|revision| (revision.publish_date, revision.id));
        Ok(scheduled)
    }

    fn upsert_module_data(
        &self,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
        fields: OverrideFields,
    ) -> Result<ModuleData, StoreError> {
        let write_txn = self.db.begin_write()?;
        let row = {
            let mut table = write_txn.open_table(MODULE_DATA)?;
            let mut existing = None;
            for entry in table.iter()? {
                let (_, bytes) = entry?;
                let row: ModuleData = decode(bytes.value())?;
                if row.module == module && row.revision == revision && &row.langcode == langcode {
                    existing = Some(row.id);
                    break;
                }
            }

            let id = match existing {
                Some(id) => id,
                None => {
                    let mut meta = write_txn.open_table(META)?;
                    let next = meta
                        .get(NEXT_MODULE_DATA)?
                        .map(|guard| guard.value())
                        .unwrap_or(0)
                        .saturating_add(1);
                    meta.insert(NEXT_MODULE_DATA, next)?;
                    ModuleDataId(next)
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
            let bytes = encode(&row)?;
            table.insert(id.0, bytes.as_slice())?;
            row
        };
        write_txn.commit()?;
        Ok(row)
    }

    fn remove_module_data(&self, id: ModuleDataId) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(MODULE_DATA)?;
            table.remove(id.0)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn set_sort_entries(&self, revision: RevisionId, modules: &[ModuleId]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SORT_ENTRIES)?;
            let mut stale = Vec::new();
            for entry in table.range((revision.0, 0)..=(revision.0, u64::MAX))? {
                let (key, _) = entry?;
                stale.push(key.value());
            }
            for key in stale {
                table.remove(key)?;
            }
            for (position, module) in modules.iter().enumerate() {
                let position = u32::try_from(position).unwrap_or(u32::MAX);
                table.insert((revision.0, module.0), position)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn promote_revision(&self, revision: RevisionId) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut revisions = write_txn.open_table(REVISIONS)?;
            let mut rev: PageRevision = match revisions.get(revision.0)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Err(StoreError::RevisionNotFound(revision)),
            };
            rev.publish_date = None;

            let mut pages = write_txn.open_table(PAGES)?;
            let mut page: Page = match pages.get(rev.page.0)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Err(StoreError::PageNotFound(rev.page)),
            };
            page.active_revision = Some(revision);

            let rev_bytes = encode(&rev)?;
            let page_bytes = encode(&page)?;
            revisions.insert(revision.0, rev_bytes.as_slice())?;
            pages.insert(page.id.0, page_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_page(&self, page: Page) -> Result<(), StoreError> {
        self.put_record(PAGES, page.id.0, &page)
    }

    fn insert_revision(&self, revision: PageRevision) -> Result<(), StoreError> {
        self.put_record(REVISIONS, revision.id.0, &revision)
    }

    fn insert_module(&self, module: PageModule) -> Result<(), StoreError> {
        self.put_record(MODULES, module.id.0, &module)
    }

    fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("site.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store
                .insert_page(Page::new(PageId(1), "home", "/").with_active(RevisionId(1)))
                .unwrap();
            store
                .upsert_module_data(ModuleId(1), RevisionId(1), &Langcode::generic(), OverrideFields {
                    enabled: Some(false),
                    ..OverrideFields::default()
                })
                .unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.page_by_url("/").unwrap().unwrap().id, PageId(1));
        assert_eq!(store.module_data(ModuleId(1)).unwrap()[0].enabled, Some(false));
    }

    #[test]
    fn upsert_is_unique_per_key() {
        let (_dir, store) = open();
        let en = Langcode::new("en");
        let fields = |t: &str| OverrideFields {
            template: Some(t.to_string()),
            ..OverrideFields::default()
        };
        let a = store
            .upsert_module_data(ModuleId(1), RevisionId(1), &en, fields("a"))
            .unwrap();
        let b = store
            .upsert_module_data(ModuleId(1), RevisionId(1), &en, fields("b"))
            .unwrap();
        let c = store
            .upsert_module_data(ModuleId(1), RevisionId(2), &en, fields("c"))
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(store.module_data(ModuleId(1)).unwrap().len(), 2);

        assert!(store.remove_module_data(c.id).unwrap());
        assert!(!store.remove_module_data(c.id).unwrap());
    }

    #[test]
    fn sort_entries_are_scoped_to_a_revision() {
        let (_dir, store) = open();
        store
            .set_sort_entries(RevisionId(1), &[ModuleId(2), ModuleId(1)])
            .unwrap();
        store.set_sort_entries(RevisionId(2), &[ModuleId(1)]).unwrap();
        store.set_sort_entries(RevisionId(1), &[ModuleId(3)]).unwrap();

        let one = store.sort_entries(&BTreeSet::from([RevisionId(1)])).unwrap();
        assert_eq!(one, vec![SortEntry {
            module: ModuleId(3),
            revision: RevisionId(1),
            position: 0,
        }]);
        let both = store
            .sort_entries(&BTreeSet::from([RevisionId(1), RevisionId(2)]))
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn promotion_is_atomic_and_clears_date() {
        let (_dir, store) = open();
        store
            .insert_page(Page::new(PageId(1), "home", "/").with_active(RevisionId(1)))
            .unwrap();
        store
            .insert_revision(PageRevision::new(RevisionId(2), PageId(1), "root").scheduled_at(5))
            .unwrap();
        assert_eq!(store.scheduled_revisions().unwrap().len(), 1);

        store.promote_revision(RevisionId(2)).unwrap();
        assert_eq!(
            store.page(PageId(1)).unwrap().unwrap().active_revision,
            Some(RevisionId(2))
        );
        assert!(store.scheduled_revisions().unwrap().is_empty());

        // page missing: nothing is written
        store
            .insert_revision(PageRevision::new(RevisionId(3), PageId(9), "root").scheduled_at(5))
            .unwrap();
        assert!(matches!(
            store.promote_revision(RevisionId(3)),
            Err(StoreError::PageNotFound(PageId(9)))
        ));
        assert_eq!(store.scheduled_revisions().unwrap().len(), 1);
    }
}
