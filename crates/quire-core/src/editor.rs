//! # Editor Writes
//!
//! The narrow write surface behind the backend editor: override rows,
//! module state, and module order.
//!
//! Writes never touch the page cache; cached pages age out by TTL. A
//! module cache key changes when a write moves the data provenance to a
//! new row or changes the effective template. A row rewritten in place
//! keeps its key, so callers follow such writes with
//! [`Editor::invalidate_cached`].

use crate::ancestry::AncestryError;
use crate::cache::{ModuleCache, module_fingerprint};
use crate::context::GenerationContext;
use crate::model::ModuleData;
use crate::registry::{InstantiateError, ModuleInstance};
use crate::resolver::ModuleOverrideResolver;
use crate::store::{ContentStore, OverrideFields, StoreError};
use crate::{Langcode, ModuleDataId, ModuleId, RevisionId};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("module {0} not found")]
    UnknownModule(ModuleId),

    #[error("revision {0} not found")]
    UnknownRevision(RevisionId),

    #[error("module state could not be encoded: {0}")]
    Encode(#[from] postcard::Error),

    #[error("module {module} listed more than once")]
    DuplicateModule { module: ModuleId },

    #[error(transparent)]
    Ancestry(#[from] AncestryError),

    #[error(transparent)]
    Instantiate(#[from] InstantiateError),
}

/// Change to one override field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldPatch<T> {
    /// Leave the stored value as it is.
    #[default]
    Keep,
    Set(T),
    /// Clear the value here so it is inherited again.
    Inherit,
}

impl<T> FieldPatch<T> {
    fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Keep => current,
            Self::Set(value) => Some(value),
            Self::Inherit => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverridePatch {
    pub template: FieldPatch<String>,
    pub enabled: FieldPatch<bool>,
    pub data: FieldPatch<Vec<u8>>,
}

impl OverridePatch {
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = FieldPatch::Set(template.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = FieldPatch::Set(enabled);
        self
    }

    #[must_use]
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = FieldPatch::Set(data);
        self
    }
}

pub struct Editor<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> Editor<'a> {
    #[must_use]
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self { store }
    }

    fn require(&self, module: ModuleId, revision: RevisionId) -> Result<(), EditError> {
        if self.store.module(module)?.is_none() {
            return Err(EditError::UnknownModule(module));
        }
        if self.store.revision(revision)?.is_none() {
            return Err(EditError::UnknownRevision(revision));
        }
        Ok(())
    }

    fn row(
        &self,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
    ) -> Result<Option<ModuleData>, EditError> {
        Ok(self
            .store
            .module_data(module)?
            .into_iter()
            .find(|row| row.revision == revision && &row.langcode == langcode))
    }

    /// Apply `patch` to the row at (module, revision, langcode). A row left
    /// with no field set is removed; `None` is returned in that case.
    pub fn set_override(
        &self,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
        patch: OverridePatch,
    ) -> Result<Option<ModuleData>, EditError> {
        self.require(module, revision)?;
        let current = self.row(module, revision, langcode)?;
        let (template, enabled, data, existing) = match current {
            Some(row) => (row.template, row.enabled, row.data, Some(row.id)),
            None => (None, None, None, None),
        };

        let fields = OverrideFields {
            template: patch.template.apply(template),
            enabled: patch.enabled.apply(enabled),
            data: patch.data.apply(data),
        };

        if fields.is_empty() {
            if let Some(id) = existing {
                self.store.remove_module_data(id)?;
            }
            return Ok(None);
        }

        let row = self
            .store
            .upsert_module_data(module, revision, langcode, fields)?;
        info!(module = %module, revision = %revision, langcode = %langcode, row = %row.id, "override saved");
        Ok(Some(row))
    }

    /// Remove the row at (module, revision, langcode).
    pub fn clear_override(
        &self,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
    ) -> Result<bool, EditError> {
        self.require(module, revision)?;
        match self.row(module, revision, langcode)? {
            Some(row) => Ok(self.store.remove_module_data(row.id)?),
            None => Ok(false),
        }
    }

    /// Persist an instance's state at (revision, langcode).
    ///
    /// The row named by the instance's provenance is updated when it sits at
    /// the same revision and language; otherwise a row is created there,
    /// leaving the inherited row untouched.
    pub fn save_state(
        &self,
        module: ModuleId,
        instance: &ModuleInstance,
        revision: RevisionId,
        langcode: &Langcode,
    ) -> Result<ModuleDataId, EditError> {
        self.require(module, revision)?;
        let state = instance.encode_state()?;

        let row = self.set_override(
            module,
            revision,
            langcode,
            OverridePatch::default().data(state),
        )?;
        let id = row
            .map(|row| row.id)
            .ok_or_else(|| EditError::Store(StoreError::Backend("state row vanished".into())))?;
        if instance.data_provenance() != Some(id) {
            debug!(module = %module, revision = %revision, row = %id, "state saved on its own row");
        }
        Ok(id)
    }

    /// Record `modules` as the order on `revision`.
    pub fn reorder(&self, revision: RevisionId, modules: &[ModuleId]) -> Result<(), EditError> {
        if self.store.revision(revision)?.is_none() {
            return Err(EditError::UnknownRevision(revision));
        }
        let mut seen = BTreeSet::new();
        for &module in modules {
            if !seen.insert(module) {
                return Err(EditError::DuplicateModule { module });
            }
            if self.store.module(module)?.is_none() {
                return Err(EditError::UnknownModule(module));
            }
        }
        self.store.set_sort_entries(revision, modules)?;
        info!(revision = %revision, modules = modules.len(), "module order saved");
        Ok(())
    }

    /// Drop the cached render of `module` as it currently resolves at
    /// (revision, langcode). Returns whether an entry was removed.
    pub fn invalidate_cached(
        ctx: &GenerationContext,
        module: ModuleId,
        revision: RevisionId,
        langcode: &Langcode,
    ) -> Result<bool, EditError> {
        let store = ctx.store.as_ref();
        let page_module = store.module(module)?.ok_or(EditError::UnknownModule(module))?;
        let rev = store
            .revision(revision)?
            .ok_or(EditError::UnknownRevision(revision))?;

        let view = ModuleOverrideResolver::new(store, ctx.config.max_ancestry_depth)
            .resolve(module, &rev, langcode)?;
        let instance = ctx.registry.instantiate(&view, &page_module.module_type)?;
        let Some(props) = instance.module().cache_properties() else {
            return Ok(false);
        };
        let template = view
            .template
            .unwrap_or_else(|| instance.module().default_template().to_string());
        let key = module_fingerprint(
            module,
            instance.data_provenance(),
            &template,
            &props.params_for(langcode),
        );
        Ok(ModuleCache::new(ctx.cache.as_ref()).invalidate(&key))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::PageId;
    use crate::model::{PageModule, PageRevision};
    use crate::module::{Module, ModuleError, ModuleType, RenderScope};
    use crate::registry::{ModuleRegistry, StoredState};
    use crate::resolver::{Provenance, ResolvedModuleView};
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Module for Note {
        fn default_template(&self) -> &str {
            "note"
        }

        fn render(&self, _template: &str, _scope: &mut RenderScope<'_>) -> Result<String, ModuleError> {
            Ok(self.text.clone())
        }
    }

    impl ModuleType for Note {
        const TYPE_ID: &'static str = "note";
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_revision(PageRevision::new(RevisionId(1), PageId(1), "root"))
            .unwrap();
        store
            .insert_revision(PageRevision::new(RevisionId(2), PageId(2), "root"))
            .unwrap();
        store
            .insert_module(PageModule::new(ModuleId(1), PageId(1), "main", "note"))
            .unwrap();
        store
            .insert_module(PageModule::new(ModuleId(2), PageId(1), "main", "note"))
            .unwrap();
        store
    }

    #[test]
    fn keep_leaves_other_fields_alone() {
        let store = seeded();
        let editor = Editor::new(&store);
        let en = Langcode::new("en");

        editor
            .set_override(ModuleId(1), RevisionId(1), &en, OverridePatch::default().template("a").enabled(false))
            .unwrap();
        let row = editor
            .set_override(ModuleId(1), RevisionId(1), &en, OverridePatch::default().template("b"))
            .unwrap()
            .unwrap();

        assert_eq!(row.template.as_deref(), Some("b"));
        assert_eq!(row.enabled, Some(false));
    }

    #[test]
    fn inheriting_every_field_removes_the_row() {
        let store = seeded();
        let editor = Editor::new(&store);
        let generic = Langcode::generic();

        editor
            .set_override(ModuleId(1), RevisionId(1), &generic, OverridePatch::default().enabled(true))
            .unwrap();
        let patch = OverridePatch {
            enabled: FieldPatch::Inherit,
            ..OverridePatch::default()
        };
        assert_eq!(editor.set_override(ModuleId(1), RevisionId(1), &generic, patch).unwrap(), None);
        assert!(store.module_data(ModuleId(1)).unwrap().is_empty());
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let store = seeded();
        let editor = Editor::new(&store);
        let generic = Langcode::generic();
        assert!(matches!(
            editor.set_override(ModuleId(9), RevisionId(1), &generic, OverridePatch::default()),
            Err(EditError::UnknownModule(ModuleId(9)))
        ));
        assert!(matches!(
            editor.set_override(ModuleId(1), RevisionId(9), &generic, OverridePatch::default()),
            Err(EditError::UnknownRevision(RevisionId(9)))
        ));
    }

    #[test]
    fn clear_override_checks_targets() {
        let store = seeded();
        let editor = Editor::new(&store);
        let en = Langcode::new("en");

        assert!(matches!(
            editor.clear_override(ModuleId(9), RevisionId(1), &en),
            Err(EditError::UnknownModule(ModuleId(9)))
        ));
        assert!(matches!(
            editor.clear_override(ModuleId(1), RevisionId(9), &en),
            Err(EditError::UnknownRevision(RevisionId(9)))
        ));

        assert!(!editor.clear_override(ModuleId(1), RevisionId(1), &en).unwrap());
        editor
            .set_override(ModuleId(1), RevisionId(1), &en, OverridePatch::default().template("a"))
            .unwrap();
        assert!(editor.clear_override(ModuleId(1), RevisionId(1), &en).unwrap());
        assert!(store.module_data(ModuleId(1)).unwrap().is_empty());
    }

    #[test]
    fn save_state_writes_at_the_requested_revision() {
        let store = seeded();
        let editor = Editor::new(&store);
        let generic = Langcode::generic();

        let inherited = store
            .upsert_module_data(
                ModuleId(1),
                RevisionId(1),
                &generic,
                OverrideFields {
                    data: Some(StoredState::encode(&Note { text: "root".into() }).unwrap()),
                    ..OverrideFields::default()
                },
            )
            .unwrap();

        let mut registry = ModuleRegistry::new();
        registry.register::<Note>();
        let view = ResolvedModuleView {
            data: inherited.data.clone(),
            provenance: Provenance {
                data: Some(inherited.id),
                ..Provenance::default()
            },
            ..ResolvedModuleView::default()
        };
        let instance = registry.instantiate(&view, "note").unwrap();

        let saved = editor
            .save_state(ModuleId(1), &instance, RevisionId(2), &generic)
            .unwrap();
        assert_ne!(saved, inherited.id);
        assert_eq!(store.module_data(ModuleId(1)).unwrap().len(), 2);

        // saving again at the same place updates the same row
        let again = editor
            .save_state(ModuleId(1), &instance, RevisionId(2), &generic)
            .unwrap();
        assert_eq!(again, saved);
    }

    #[test]
    fn reorder_validates_modules() {
        let store = seeded();
        let editor = Editor::new(&store);
        assert!(matches!(
            editor.reorder(RevisionId(1), &[ModuleId(1), ModuleId(1)]),
            Err(EditError::DuplicateModule { .. })
        ));
        assert!(matches!(
            editor.reorder(RevisionId(1), &[ModuleId(7)]),
            Err(EditError::UnknownModule(ModuleId(7)))
        ));
        editor
            .reorder(RevisionId(1), &[ModuleId(2), ModuleId(1)])
            .unwrap();
        let entries = store
            .sort_entries(&BTreeSet::from([RevisionId(1)]))
            .unwrap();
        assert_eq!(entries.len(), 2);
    }
}
