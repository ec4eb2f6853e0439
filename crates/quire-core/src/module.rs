//! # Module Contract
//!
//! What the engine needs from a module implementation, and nothing more.
//!
//! A module type is a plain serde struct: its fields are the persisted
//! state, `Default` gives the state of a freshly attached module.
//! [`ModuleType`] ties the struct to a stable type identifier used by the
//! [`crate::registry::ModuleRegistry`].

use crate::Langcode;
use crate::cache::Ttl;
use crate::effects::{EffectLog, HeadState, SideEffect};
use crate::template::{TemplateEngine, TemplateError, TemplateVars};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{0}")]
    Render(String),
}

/// Fingerprint parameter carrying the request language of a
/// [`CacheProperties::per_language`] module.
pub const LANGUAGE_PARAM: &str = "langcode";

/// Cache declaration of a module.
///
/// The fingerprint covers the module, its data row, the template and
/// `params`. A module whose output depends on [`RenderScope::language`]
/// without a language-specific data row must declare
/// [`per_language`](Self::per_language), or its render is shared across
/// languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheProperties {
    /// Extra inputs to the fingerprint (e.g. a variant the module renders).
    pub params: BTreeMap<String, String>,
    pub lifetime: Ttl,
    /// Key the render by request language.
    pub per_language: bool,
}

impl CacheProperties {
    /// Cache until explicitly invalidated.
    #[must_use]
    pub fn forever() -> Self {
        Self {
            params: BTreeMap::new(),
            lifetime: Ttl::Forever,
            per_language: false,
        }
    }

    #[must_use]
    pub fn seconds(secs: u64) -> Self {
        Self {
            params: BTreeMap::new(),
            lifetime: Ttl::Seconds(secs),
            per_language: false,
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn per_language(mut self) -> Self {
        self.per_language = true;
        self
    }

    /// Fingerprint parameters for a render in `language`.
    #[must_use]
    pub fn params_for(&self, language: &Langcode) -> BTreeMap<String, String> {
        let mut params = self.params.clone();
        if self.per_language {
            params.insert(LANGUAGE_PARAM.to_string(), language.as_str().to_string());
        }
        params
    }
}

/// What a module sees while rendering.
pub struct RenderScope<'a> {
    templates: &'a dyn TemplateEngine,
    head: &'a HeadState,
    effects: &'a mut EffectLog,
    language: &'a Langcode,
}

impl<'a> RenderScope<'a> {
    #[must_use]
    pub fn new(
        templates: &'a dyn TemplateEngine,
        head: &'a HeadState,
        effects: &'a mut EffectLog,
        language: &'a Langcode,
    ) -> Self {
        Self {
            templates,
            head,
            effects,
            language,
        }
    }

    pub fn render_template(
        &self,
        template: &str,
        vars: &TemplateVars,
    ) -> Result<String, ModuleError> {
        Ok(self.templates.render(template, vars)?)
    }

    /// Head state accumulated by the modules rendered before this one.
    #[must_use]
    pub fn head(&self) -> &HeadState {
        self.head
    }

    #[must_use]
    pub fn language(&self) -> &Langcode {
        self.language
    }

    pub fn add_head_tag(&mut self, tag: impl Into<String>) {
        self.effects.record(SideEffect::HeadTag(tag.into()));
    }

    pub fn add_stylesheet(&mut self, href: impl Into<String>) {
        self.effects.record(SideEffect::Stylesheet(href.into()));
    }

    pub fn add_script(&mut self, src: impl Into<String>) {
        self.effects.record(SideEffect::Script(src.into()));
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.effects
            .record(SideEffect::Header(name.into(), value.into()));
    }
}

/// A renderable module.
pub trait Module: Send + Sync {
    /// Template used when no override names one.
    fn default_template(&self) -> &str;

    fn render(&self, template: &str, scope: &mut RenderScope<'_>) -> Result<String, ModuleError>;

    /// `None` means the output is never cached.
    fn cache_properties(&self) -> Option<CacheProperties> {
        None
    }

    /// Enabled state when no override sets one.
    fn is_enabled_by_default(&self) -> bool {
        true
    }
}

/// A module type with persisted state and a stable identifier.
pub trait ModuleType: Module + Serialize + DeserializeOwned + Default + 'static {
    const TYPE_ID: &'static str;
}
