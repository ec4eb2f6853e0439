//! # Module Override Resolver
//!
//! Folds the override rows of one module into its effective configuration
//! for a revision and language.
//!
//! ## The cascade
//!
//! 1. Rows on revisions outside the ancestry chain are dropped, as are rows
//!    for a different (non-generic) language.
//! 2. Remaining rows are ordered by `(rank, specificity)`: the most distant
//!    ancestor first, and at equal rank the generic row before the
//!    language-specific one. The sort is stable, so equal keys keep arrival
//!    order.
//! 3. Rows are folded left to right, field by field. A set field overwrites
//!    the accumulator and becomes that field's provenance; an unset field
//!    never clears a value already resolved.
//!
//! A module with no matching rows resolves to a fully unset view; callers
//! apply the module type's defaults.

use crate::ancestry::{Ancestry, AncestryError, AncestryResolver};
use crate::model::{ModuleData, PageRevision};
use crate::store::{ContentStore, StoreError};
use crate::{Langcode, ModuleDataId, ModuleId};

/// Which row produced each resolved field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Provenance {
    pub template: Option<ModuleDataId>,
    pub enabled: Option<ModuleDataId>,
    pub data: Option<ModuleDataId>,
}

/// Effective configuration of a module on one revision, in one language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedModuleView {
    pub template: Option<String>,
    pub enabled: Option<bool>,
    pub data: Option<Vec<u8>>,
    pub provenance: Provenance,
}

impl ResolvedModuleView {
    /// True when no row contributed anything.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.template.is_none() && self.enabled.is_none() && self.data.is_none()
    }

    fn apply(&mut self, row: &ModuleData) {
        if let Some(template) = &row.template {
            self.template = Some(template.clone());
            self.provenance.template = Some(row.id);
        }
        if let Some(enabled) = row.enabled {
            self.enabled = Some(enabled);
            self.provenance.enabled = Some(row.id);
        }
        if let Some(data) = &row.data {
            self.data = Some(data.clone());
            self.provenance.data = Some(row.id);
        }
    }
}

/// 0 for a generic row, 1 for a row in the requested language.
fn specificity(langcode: &Langcode) -> u8 {
    u8::from(!langcode.is_generic())
}

/// Fold `rows` for `language` over a resolved chain.
///
/// Pure function; the store-backed resolver delegates here.
#[must_use]
pub fn fold_overrides(
    rows: &[ModuleData],
    ancestry: &Ancestry,
    language: &Langcode,
) -> ResolvedModuleView {
    let mut applicable: Vec<(usize, u8, &ModuleData)> = rows
        .iter()
        .filter(|row| row.langcode.is_generic() || &row.langcode == language)
        .filter_map(|row| {
            ancestry
                .rank(row.revision)
                .map(|rank| (rank, specificity(&row.langcode), row))
        })
        .collect();

    applicable.sort_by_key(|(rank, spec, _)| (*rank, *spec));

    let mut view = ResolvedModuleView::default();
    for (_, _, row) in applicable {
        view.apply(row);
    }
    view
}

/// Store-backed resolver.
pub struct ModuleOverrideResolver<'a> {
    store: &'a dyn ContentStore,
    max_depth: usize,
}

impl<'a> ModuleOverrideResolver<'a> {
    #[must_use]
    pub fn new(store: &'a dyn ContentStore, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Resolve `module` for `revision` in `language`, computing the chain.
    pub fn resolve(
        &self,
        module: ModuleId,
        revision: &PageRevision,
        language: &Langcode,
    ) -> Result<ResolvedModuleView, AncestryError> {
        let ancestry = AncestryResolver::new(self.store, self.max_depth).resolve(revision)?;
        Ok(self.resolve_in(&ancestry, module, language)?)
    }

    /// Resolve against an already computed chain.
    pub fn resolve_in(
        &self,
        ancestry: &Ancestry,
        module: ModuleId,
        language: &Langcode,
    ) -> Result<ResolvedModuleView, StoreError> {
        let rows = self.store.module_data(module)?;
        Ok(fold_overrides(&rows, ancestry, language))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ancestry::ChainLink;
    use crate::model::Page;
    use crate::store::{MemoryStore, OverrideFields};
    use crate::{PageId, RevisionId};
    use proptest::prelude::*;

    fn chain(revisions: &[u64]) -> Ancestry {
        Ancestry::from_links(
            revisions
                .iter()
                .map(|&r| ChainLink {
                    revision: RevisionId(r),
                    page: PageId(r),
                })
                .collect(),
        )
    }

    fn row(id: u64, revision: u64, lang: &str) -> ModuleData {
        ModuleData {
            id: ModuleDataId(id),
            module: ModuleId(1),
            revision: RevisionId(revision),
            langcode: Langcode::new(lang),
            template: None,
            enabled: None,
            data: None,
        }
    }

    #[test]
    fn resolution_example_language_override() {
        // (M, root, "") -> Template=A, Enabled=true ; (M, P, "en") -> Template=B
        let ancestry = chain(&[1, 2]);
        let mut generic = row(1, 1, "");
        generic.template = Some("A".into());
        generic.enabled = Some(true);
        let mut english = row(2, 2, "en");
        english.template = Some("B".into());
        let rows = vec![generic, english];

        let en = fold_overrides(&rows, &ancestry, &Langcode::new("en"));
        assert_eq!(en.template.as_deref(), Some("B"));
        assert_eq!(en.enabled, Some(true));
        assert_eq!(en.provenance.template, Some(ModuleDataId(2)));
        assert_eq!(en.provenance.enabled, Some(ModuleDataId(1)));

        let sv = fold_overrides(&rows, &ancestry, &Langcode::new("sv"));
        assert_eq!(sv.template.as_deref(), Some("A"));
        assert_eq!(sv.enabled, Some(true));
    }

    #[test]
    fn unset_field_never_clears() {
        let ancestry = chain(&[1, 2]);
        let mut base = row(1, 1, "");
        base.template = Some("A".into());
        let mut child = row(2, 2, "");
        child.enabled = Some(false);

        let view = fold_overrides(&[base, child], &ancestry, &Langcode::generic());
        assert_eq!(view.template.as_deref(), Some("A"));
        assert_eq!(view.enabled, Some(false));
    }

    #[test]
    fn language_row_wins_only_at_equal_rank() {
        // language-specific on the root, generic on the child: child wins.
        let ancestry = chain(&[1, 2]);
        let mut root_en = row(1, 1, "en");
        root_en.template = Some("root-en".into());
        let mut child = row(2, 2, "");
        child.template = Some("child".into());

        let view = fold_overrides(&[child, root_en], &ancestry, &Langcode::new("en"));
        assert_eq!(view.template.as_deref(), Some("child"));
    }

    #[test]
    fn rows_off_chain_are_ignored() {
        let ancestry = chain(&[1]);
        let mut stray = row(1, 9, "");
        stray.enabled = Some(false);
        let view = fold_overrides(&[stray], &ancestry, &Langcode::generic());
        assert!(view.is_unset());
    }

    #[test]
    fn no_rows_is_fully_unset() {
        let view = fold_overrides(&[], &chain(&[1, 2]), &Langcode::new("en"));
        assert!(view.is_unset());
        assert_eq!(view.provenance, Provenance::default());
    }

    #[test]
    fn false_and_empty_are_values() {
        let ancestry = chain(&[1, 2]);
        let mut base = row(1, 1, "");
        base.enabled = Some(true);
        base.data = Some(vec![1, 2]);
        let mut child = row(2, 2, "");
        child.enabled = Some(false);
        child.data = Some(Vec::new());

        let view = fold_overrides(&[base, child], &ancestry, &Langcode::generic());
        assert_eq!(view.enabled, Some(false));
        assert_eq!(view.data, Some(Vec::new()));
        assert_eq!(view.provenance.data, Some(ModuleDataId(2)));
    }

    #[test]
    fn store_backed_resolution() {
        let store = MemoryStore::new();
        store
            .insert_page(Page::new(PageId(1), "root", "/").with_active(RevisionId(1)))
            .unwrap();
        store
            .insert_revision(PageRevision::new(RevisionId(1), PageId(1), "root"))
            .unwrap();
        let child = PageRevision::new(RevisionId(2), PageId(2), "root").with_base(PageId(1));
        store.insert_revision(child.clone()).unwrap();
        store
            .upsert_module_data(
                ModuleId(5),
                RevisionId(1),
                &Langcode::generic(),
                OverrideFields {
                    template: Some("A".into()),
                    enabled: Some(true),
                    data: None,
                },
            )
            .unwrap();

        let resolver = ModuleOverrideResolver::new(&store, 16);
        let view = resolver
            .resolve(ModuleId(5), &child, &Langcode::new("en"))
            .unwrap();
        assert_eq!(view.template.as_deref(), Some("A"));

        let again = resolver
            .resolve(ModuleId(5), &child, &Langcode::new("en"))
            .unwrap();
        assert_eq!(view, again);
    }

    // -------------------------------------------------------------------------
    // Property tests
    // -------------------------------------------------------------------------

    /// Optional override per (revision, generic|language) slot.
    type Slot = (Option<u8>, Option<bool>);

    fn reference_walk(slots: &[(Slot, Slot)]) -> (Option<String>, Option<bool>) {
        let mut template = None;
        let mut enabled = None;
        for (generic, specific) in slots {
            for (t, e) in [generic, specific] {
                if let Some(t) = t {
                    template = Some(format!("t{t}"));
                }
                if let Some(e) = e {
                    enabled = Some(*e);
                }
            }
        }
        (template, enabled)
    }

    fn rows_from_slots(slots: &[(Slot, Slot)]) -> Vec<ModuleData> {
        let mut rows = Vec::new();
        let mut next_id = 1;
        // Emit language rows before generic ones so ordering is not luck.
        for (lang, pick) in [("en", 1usize), ("", 0usize)] {
            for (rev, pair) in slots.iter().enumerate() {
                let (t, e) = if pick == 0 { pair.0 } else { pair.1 };
                let mut r = row(next_id, rev as u64 + 1, lang);
                next_id += 1;
                r.template = t.map(|t| format!("t{t}"));
                r.enabled = e;
                rows.push(r);
            }
        }
        rows
    }

    fn arb_slot() -> impl Strategy<Value = Slot> {
        (proptest::option::of(0u8..4), proptest::option::of(any::<bool>()))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Resolving for L equals walking R0..Rn applying generic then L.
        #[test]
        fn cascade_matches_reference_walk(
            slots in proptest::collection::vec((arb_slot(), arb_slot()), 1..6)
        ) {
            let ancestry = chain(&(1..=slots.len() as u64).collect::<Vec<_>>());
            let rows = rows_from_slots(&slots);
            let view = fold_overrides(&rows, &ancestry, &Langcode::new("en"));
            let (template, enabled) = reference_walk(&slots);
            prop_assert_eq!(view.template, template);
            prop_assert_eq!(view.enabled, enabled);
        }

        /// A later row with no template keeps the earlier template.
        #[test]
        fn null_template_preserves_value(
            depth in 2usize..6,
            template in 0u8..4,
        ) {
            let ancestry = chain(&(1..=depth as u64).collect::<Vec<_>>());
            let mut rows = Vec::new();
            let mut first = row(1, 1, "");
            first.template = Some(format!("t{template}"));
            rows.push(first);
            for rev in 2..=depth as u64 {
                let mut r = row(rev, rev, "");
                r.enabled = Some(rev % 2 == 0);
                rows.push(r);
            }
            let view = fold_overrides(&rows, &ancestry, &Langcode::generic());
            prop_assert_eq!(view.template, Some(format!("t{template}")));
            prop_assert_eq!(view.provenance.template, Some(ModuleDataId(1)));
        }

        /// Same input, same output.
        #[test]
        fn resolution_is_idempotent(
            slots in proptest::collection::vec((arb_slot(), arb_slot()), 1..5)
        ) {
            let ancestry = chain(&(1..=slots.len() as u64).collect::<Vec<_>>());
            let rows = rows_from_slots(&slots);
            let lang = Langcode::new("en");
            prop_assert_eq!(
                fold_overrides(&rows, &ancestry, &lang),
                fold_overrides(&rows, &ancestry, &lang)
            );
        }
    }
}
