//! # Quire Core
//!
//! The page generation engine for Quire.
//!
//! Pages are composed of pluggable modules rendered into named template
//! slots. A module's configuration is not stored in one place: every page
//! revision on the inheritance chain may override its template, enabled
//! flag, or serialized state, generically or for one language. This crate
//! folds those overrides into one effective configuration, instantiates
//! and renders modules, caches their output, and promotes scheduled
//! revisions.
//!
//! ## Layout
//!
//! - [`ancestry`] - revision inheritance chain and specificity ranks
//! - [`resolver`] - the override cascade
//! - [`ordering`] - module membership and sort order
//! - [`registry`] - module types, factories, instantiation
//! - [`pipeline`] - the generator that turns a revision into a response
//! - [`cache`] - cache store, fingerprints, module and page caches
//! - [`scheduler`] - lazy auto-publish
//! - [`store`] / [`storage`] - the content store and its redb backend
//!
//! Collaborators (store, cache, template engine, clock) are injected via
//! [`context::GenerationContext`]. There is no global state.

pub mod ancestry;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod editor;
pub mod effects;
pub mod model;
pub mod module;
pub mod ordering;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod template;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use ancestry::{Ancestry, AncestryError, AncestryResolver, ChainLink};
pub use cache::{CacheError, CacheLifetime, CacheStore, Lookup, MemoryCache, Ttl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GeneratorConfig, ProfilingThresholds};
pub use context::GenerationContext;
pub use editor::{EditError, Editor, FieldPatch, OverridePatch};
pub use effects::{EffectLog, HeadState, SideEffect};
pub use model::{ModuleData, Page, PageModule, PageRevision, RevisionSelector, SortEntry};
pub use module::{CacheProperties, LANGUAGE_PARAM, Module, ModuleError, ModuleType, RenderScope};
pub use ordering::{OrderSource, OrderedModules};
pub use pipeline::{
    Generator, GenerateError, Method, ModuleProfile, ModuleReport, ModuleStatus, PageResponse,
    RenderedPage, RequestContext, Served,
};
pub use registry::{
    InstantiateError, ModuleInstance, ModuleRegistry, StateOrigin, StateRejection, StoredState,
};
pub use resolver::{ModuleOverrideResolver, Provenance, ResolvedModuleView};
pub use scheduler::{AutoPublishScheduler, PublishCheck, PublishError, PublishReport};
pub use storage::RedbStore;
pub use store::{ContentStore, MemoryStore, OverrideFields, StoreError};
pub use template::{MemoryTemplates, TemplateEngine, TemplateError, TemplateVars};

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Page`] (a node in the site tree).
    PageId
);
id_type!(
    /// Identifier of a [`PageRevision`].
    RevisionId
);
id_type!(
    /// Identifier of a [`PageModule`].
    ModuleId
);
id_type!(
    /// Identifier of a [`ModuleData`] override row.
    ModuleDataId
);

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

// =============================================================================
// LANGCODE
// =============================================================================

/// Language code of an override row or a request.
///
/// The empty code is the generic language: a generic override applies to
/// every language, a language-specific one only to its own language and wins
/// over the generic one at the same revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Langcode(String);

impl Langcode {
    /// The generic (empty) language code.
    #[must_use]
    pub fn generic() -> Self {
        Self(String::new())
    }

    /// Create a language code. Surrounding whitespace is dropped.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self(code.trim().to_string())
    }

    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Langcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_generic() {
            f.write_str("*")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for Langcode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

// =============================================================================
// CRATE ERROR
// =============================================================================

/// Aggregate error for callers that drive several components at once.
#[derive(Debug, thiserror::Error)]
pub enum QuireError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ancestry(#[from] AncestryError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Instantiate(#[from] InstantiateError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Edit(#[from] EditError),
}

// =============================================================================
// TESTS
// =============================================================================
