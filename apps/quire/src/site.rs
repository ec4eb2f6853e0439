//! # Site Import
//!
//! Seeds a content store from a JSON site description.
//!
//! ```json
//! {
//!   "pages":     [{"id": 1, "name": "Home", "url": "/", "active_revision": 10}],
//!   "revisions": [{"id": 10, "page": 1, "template": "page"}],
//!   "modules":   [{"id": 1, "page": 1, "target": "main", "module_type": "text"}],
//!   "overrides": [{"module": 1, "revision": 10, "state": {"body": "hi"}}],
//!   "order":     [{"revision": 10, "modules": [1]}]
//! }
//! ```
//!
//! Override state is given as JSON and encoded for the module's type. The
//! whole document is validated before anything is written.

use crate::modules::{DEFAULT_PAGE_TEMPLATE, StateJsonError, encode_json_state};
use quire_core::{
    CacheLifetime, ContentStore, Langcode, ModuleId, OverrideFields, Page, PageId, PageModule,
    PageRevision, RevisionId, StoreError, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid site file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid site: {0}")]
    Invalid(String),

    #[error(transparent)]
    State(#[from] StateJsonError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// DOCUMENT
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteFile {
    pub pages: Vec<PageEntry>,
    pub revisions: Vec<RevisionEntry>,
    pub modules: Vec<ModuleEntry>,
    pub overrides: Vec<OverrideEntry>,
    pub order: Vec<OrderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    pub id: u64,
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub active_revision: Option<u64>,
    #[serde(default)]
    pub working_revision: Option<u64>,
    /// 0 = never cache, negative = forever, positive = seconds.
    #[serde(default)]
    pub cache_lifetime: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub id: u64,
    pub page: u64,
    #[serde(default)]
    pub base_page: Option<u64>,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub publish_date: Option<Timestamp>,
    #[serde(default)]
    pub description: String,
}

fn default_template() -> String {
    DEFAULT_PAGE_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: u64,
    pub page: u64,
    pub target: String,
    pub module_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_inherit")]
    pub inherit: bool,
}

fn default_inherit() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub module: u64,
    pub revision: u64,
    #[serde(default)]
    pub langcode: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEntry {
    pub revision: u64,
    pub modules: Vec<u64>,
}

/// Counts of what an import wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub pages: usize,
    pub revisions: usize,
    pub modules: usize,
    pub overrides: usize,
    pub orders: usize,
}

impl SiteFile {
    pub fn load(path: &Path) -> Result<Self, SiteError> {
        let content = std::fs::read_to_string(path).map_err(|source| SiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SiteError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every cross reference. Returns the module type of each module.
    fn validate(&self) -> Result<BTreeMap<u64, &str>, SiteError> {
        let pages = unique_ids("page", self.pages.iter().map(|p| p.id))?;
        let revisions = unique_ids("revision", self.revisions.iter().map(|r| r.id))?;
        unique_ids("module", self.modules.iter().map(|m| m.id))?;

        let revision_page: BTreeMap<u64, u64> =
            self.revisions.iter().map(|r| (r.id, r.page)).collect();

        for page in &self.pages {
            if let Some(parent) = page.parent {
                require("parent page", parent, &pages)?;
            }
            for revision in [page.active_revision, page.working_revision].into_iter().flatten() {
                require("revision", revision, &revisions)?;
                if revision_page.get(&revision) != Some(&page.id) {
                    return Err(SiteError::Invalid(format!(
                        "revision {revision} does not belong to page {}",
                        page.id
                    )));
                }
            }
        }
        for revision in &self.revisions {
            require("page", revision.page, &pages)?;
            if let Some(base) = revision.base_page {
                require("base page", base, &pages)?;
            }
        }

        let mut module_types = BTreeMap::new();
        for module in &self.modules {
            require("page", module.page, &pages)?;
            module_types.insert(module.id, module.module_type.as_str());
        }

        let mut rows = BTreeSet::new();
        for entry in &self.overrides {
            if !module_types.contains_key(&entry.module) {
                return Err(SiteError::Invalid(format!("unknown module {}", entry.module)));
            }
            require("revision", entry.revision, &revisions)?;
            let langcode = Langcode::new(entry.langcode.as_str());
            if !rows.insert((entry.module, entry.revision, langcode.clone())) {
                return Err(SiteError::Invalid(format!(
                    "duplicate override for module {} at revision {} ({langcode})",
                    entry.module, entry.revision
                )));
            }
        }

        for order in &self.order {
            require("revision", order.revision, &revisions)?;
            let mut seen = BTreeSet::new();
            for &module in &order.modules {
                if !module_types.contains_key(&module) || !seen.insert(module) {
                    return Err(SiteError::Invalid(format!(
                        "order of revision {} names module {module} twice or not at all",
                        order.revision
                    )));
                }
            }
        }
        Ok(module_types)
    }
}

fn unique_ids(kind: &str, ids: impl Iterator<Item = u64>) -> Result<BTreeSet<u64>, SiteError> {
    let mut set = BTreeSet::new();
    for id in ids {
        if !set.insert(id) {
            return Err(SiteError::Invalid(format!("duplicate {kind} id {id}")));
        }
    }
    Ok(set)
}

fn require(kind: &str, id: u64, known: &BTreeSet<u64>) -> Result<(), SiteError> {
    if known.contains(&id) {
        Ok(())
    } else {
        Err(SiteError::Invalid(format!("unknown {kind} {id}")))
    }
}

// =============================================================================
// IMPORT
// =============================================================================

/// Validate `site` and write it into `store`.
pub fn import_site(store: &dyn ContentStore, site: &SiteFile) -> Result<ImportSummary, SiteError> {
    let module_types = site.validate()?;

    // Encode every state first so a bad document writes nothing.
    let mut overrides = Vec::with_capacity(site.overrides.len());
    for entry in &site.overrides {
        let data = match (&entry.state, module_types.get(&entry.module)) {
            (Some(state), Some(module_type)) => Some(encode_json_state(module_type, state.clone())?),
            _ => None,
        };
        overrides.push((
            entry,
            OverrideFields {
                template: entry.template.clone(),
                enabled: entry.enabled,
                data,
            },
        ));
    }

    for entry in &site.pages {
        let mut page = Page::new(PageId(entry.id), entry.name.as_str(), entry.url.as_str());
        page.parent = entry.parent.map(PageId);
        page.active_revision = entry.active_revision.map(RevisionId);
        page.working_revision = entry.working_revision.map(RevisionId);
        page.cache_lifetime = entry.cache_lifetime.map(CacheLifetime);
        store.insert_page(page)?;
    }
    for entry in &site.revisions {
        let mut revision =
            PageRevision::new(RevisionId(entry.id), PageId(entry.page), entry.template.as_str());
        revision.base_page = entry.base_page.map(PageId);
        revision.publish_date = entry.publish_date;
        revision.description.clone_from(&entry.description);
        store.insert_revision(revision)?;
    }
    for entry in &site.modules {
        let mut module = PageModule::new(
            ModuleId(entry.id),
            PageId(entry.page),
            entry.target.as_str(),
            entry.module_type.as_str(),
        )
        .named(entry.name.as_str());
        module.inherit = entry.inherit;
        store.insert_module(module)?;
    }

    let mut written = 0;
    for (entry, fields) in overrides {
        if fields.is_empty() {
            continue;
        }
        store.upsert_module_data(
            ModuleId(entry.module),
            RevisionId(entry.revision),
            &Langcode::new(entry.langcode.as_str()),
            fields,
        )?;
        written += 1;
    }
    for order in &site.order {
        let modules: Vec<ModuleId> = order.modules.iter().copied().map(ModuleId).collect();
        store.set_sort_entries(RevisionId(order.revision), &modules)?;
    }

    let summary = ImportSummary {
        pages: site.pages.len(),
        revisions: site.revisions.len(),
        modules: site.modules.len(),
        overrides: written,
        orders: site.order.len(),
    };
    info!(
        pages = summary.pages,
        revisions = summary.revisions,
        modules = summary.modules,
        overrides = summary.overrides,
        "site imported"
    );
    Ok(summary)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quire_core::{MemoryStore, RevisionSelector};

    const SITE: &str = r#"{
        "pages": [
            {"id": 1, "name": "Home", "url": "/", "active_revision": 10, "cache_lifetime": 60},
            {"id": 2, "name": "About", "url": "/about", "parent": 1, "active_revision": 20}
        ],
        "revisions": [
            {"id": 10, "page": 1},
            {"id": 20, "page": 2, "base_page": 1},
            {"id": 21, "page": 2, "base_page": 1, "publish_date": 2000000000}
        ],
        "modules": [
            {"id": 1, "page": 1, "target": "header", "module_type": "heading"},
            {"id": 2, "page": 2, "target": "main", "module_type": "text", "inherit": false}
        ],
        "overrides": [
            {"module": 1, "revision": 10, "state": {"title": "Welcome", "level": 2}},
            {"module": 1, "revision": 20, "langcode": "sv", "template": "heading"},
            {"module": 2, "revision": 20}
        ],
        "order": [{"revision": 20, "modules": [2, 1]}]
    }"#;

    fn parse(json: &str) -> SiteFile {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn imports_every_record() {
        let store = MemoryStore::new();
        let summary = import_site(&store, &parse(SITE)).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                pages: 2,
                revisions: 3,
                modules: 2,
                overrides: 2,
                orders: 1,
            }
        );

        let about = store.page_by_url("/about").unwrap().unwrap();
        assert_eq!(about.parent, Some(PageId(1)));
        assert_eq!(about.select(RevisionSelector::Active), Some(RevisionId(20)));

        let home = store.page(PageId(1)).unwrap().unwrap();
        assert_eq!(home.cache_lifetime, Some(CacheLifetime(60)));

        let revision = store.revision(RevisionId(10)).unwrap().unwrap();
        assert_eq!(revision.template, DEFAULT_PAGE_TEMPLATE);

        let local = store.module(ModuleId(2)).unwrap().unwrap();
        assert!(!local.inherit);

        let rows = store.module_data(ModuleId(1)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|row| row.data.is_some() && row.langcode.is_generic()));

        assert_eq!(store.scheduled_revisions().unwrap().len(), 1);
    }

    #[test]
    fn rejects_dangling_references() {
        let site = parse(
            r#"{"pages": [{"id": 1, "url": "/", "active_revision": 9}], "revisions": []}"#,
        );
        let store = MemoryStore::new();
        assert!(matches!(import_site(&store, &site), Err(SiteError::Invalid(_))));
        assert!(store.page(PageId(1)).unwrap().is_none());
    }

    #[test]
    fn rejects_foreign_active_revision() {
        let site = parse(
            r#"{
                "pages": [{"id": 1, "url": "/"}, {"id": 2, "url": "/b", "active_revision": 10}],
                "revisions": [{"id": 10, "page": 1}]
            }"#,
        );
        assert!(matches!(
            import_site(&MemoryStore::new(), &site),
            Err(SiteError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_duplicate_override_rows() {
        let site = parse(
            r#"{
                "pages": [{"id": 1, "url": "/"}],
                "revisions": [{"id": 10, "page": 1}],
                "modules": [{"id": 1, "page": 1, "target": "main", "module_type": "text"}],
                "overrides": [
                    {"module": 1, "revision": 10, "langcode": "en", "enabled": true},
                    {"module": 1, "revision": 10, "langcode": " en ", "enabled": false}
                ]
            }"#,
        );
        assert!(matches!(
            import_site(&MemoryStore::new(), &site),
            Err(SiteError::Invalid(_))
        ));
    }

    #[test]
    fn bad_state_writes_nothing() {
        let site = parse(
            r#"{
                "pages": [{"id": 1, "url": "/"}],
                "revisions": [{"id": 10, "page": 1}],
                "modules": [{"id": 1, "page": 1, "target": "main", "module_type": "heading"}],
                "overrides": [{"module": 1, "revision": 10, "state": {"level": "top"}}]
            }"#,
        );
        let store = MemoryStore::new();
        assert!(matches!(import_site(&store, &site), Err(SiteError::State(_))));
        assert!(store.page(PageId(1)).unwrap().is_none());
    }
}
