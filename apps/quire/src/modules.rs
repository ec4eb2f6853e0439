//! # Built-in Modules
//!
//! Module types shipped with the binary, their default templates, and the
//! JSON bridge editors use to write module state.

use quire_core::{
    CacheProperties, MemoryTemplates, Module, ModuleError, ModuleRegistry, ModuleType,
    RenderScope, StoredState, TemplateVars,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root template used when a revision names none of its own.
pub const DEFAULT_PAGE_TEMPLATE: &str = "page";

// =============================================================================
// TEXT
// =============================================================================

/// Free-form markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextModule {
    pub body: String,
}

impl Module for TextModule {
    fn default_template(&self) -> &str {
        "text"
    }

    fn render(&self, template: &str, scope: &mut RenderScope<'_>) -> Result<String, ModuleError> {
        let mut vars = TemplateVars::new();
        vars.insert("body".into(), self.body.clone());
        scope.render_template(template, &vars)
    }
}

impl ModuleType for TextModule {
    const TYPE_ID: &'static str = "text";
}

// =============================================================================
// HEADING
// =============================================================================

/// A page heading. Output depends only on its state, so it is cached until
/// invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingModule {
    pub title: String,
    pub level: u8,
}

impl Default for HeadingModule {
    fn default() -> Self {
        Self {
            title: String::new(),
            level: 1,
        }
    }
}

impl HeadingModule {
    fn clamped_level(&self) -> u8 {
        self.level.clamp(1, 6)
    }
}

impl Module for HeadingModule {
    fn default_template(&self) -> &str {
        "heading"
    }

    fn render(&self, template: &str, scope: &mut RenderScope<'_>) -> Result<String, ModuleError> {
        if self.title.is_empty() {
            return Err(ModuleError::Render("heading has no title".into()));
        }
        let mut vars = TemplateVars::new();
        vars.insert("title".into(), escape_html(&self.title));
        vars.insert("level".into(), self.clamped_level().to_string());
        scope.render_template(template, &vars)
    }

    fn cache_properties(&self) -> Option<CacheProperties> {
        Some(CacheProperties::forever().with_param("level", self.clamped_level().to_string()))
    }
}

impl ModuleType for HeadingModule {
    const TYPE_ID: &'static str = "heading";
}

// =============================================================================
// STYLESHEET
// =============================================================================

/// Adds a stylesheet link to the document head. Renders no content, and
/// is disabled until an override enables it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StylesheetModule {
    pub href: String,
}

impl Module for StylesheetModule {
    fn default_template(&self) -> &str {
        "stylesheet"
    }

    fn render(&self, _template: &str, scope: &mut RenderScope<'_>) -> Result<String, ModuleError> {
        if self.href.is_empty() {
            return Err(ModuleError::Render("stylesheet has no href".into()));
        }
        scope.add_stylesheet(self.href.clone());
        Ok(String::new())
    }

    fn cache_properties(&self) -> Option<CacheProperties> {
        Some(CacheProperties::seconds(3_600))
    }

    fn is_enabled_by_default(&self) -> bool {
        false
    }
}

impl ModuleType for StylesheetModule {
    const TYPE_ID: &'static str = "stylesheet";
}

// =============================================================================
// REGISTRY & TEMPLATES
// =============================================================================

#[must_use]
pub fn builtin_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register::<TextModule>()
        .register::<HeadingModule>()
        .register::<StylesheetModule>();
    registry
}

/// Default templates for the built-in module types and the page layout.
#[must_use]
pub fn builtin_templates() -> MemoryTemplates {
    MemoryTemplates::new()
        .with(
            DEFAULT_PAGE_TEMPLATE,
            "<!DOCTYPE html>\n<html lang=\"{{ language }}\">\n<head>\n<title>{{ page_name }}</title>\n{{ head }}\n</head>\n<body>\n{{ header }}\n<main>{{ main }}</main>\n{{ footer }}\n</body>\n</html>\n",
        )
        .with("text", "{{ body }}")
        .with("heading", "<h{{ level }}>{{ title }}</h{{ level }}>")
        .with("stylesheet", "")
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// =============================================================================
// JSON STATE
// =============================================================================

#[derive(Debug, Error)]
pub enum StateJsonError {
    #[error("no built-in module type {0}")]
    UnknownType(String),

    #[error("invalid state for {module_type}: {source}")]
    Json {
        module_type: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Encode(#[from] postcard::Error),
}

/// Encode JSON state as the stored envelope of a built-in module type.
pub fn encode_json_state(
    module_type: &str,
    state: serde_json::Value,
) -> Result<Vec<u8>, StateJsonError> {
    match module_type {
        TextModule::TYPE_ID => encode_as::<TextModule>(state),
        HeadingModule::TYPE_ID => encode_as::<HeadingModule>(state),
        StylesheetModule::TYPE_ID => encode_as::<StylesheetModule>(state),
        other => Err(StateJsonError::UnknownType(other.to_string())),
    }
}

fn encode_as<T: ModuleType + DeserializeOwned>(
    state: serde_json::Value,
) -> Result<Vec<u8>, StateJsonError> {
    let module: T = serde_json::from_value(state).map_err(|source| StateJsonError::Json {
        module_type: T::TYPE_ID.to_string(),
        source,
    })?;
    Ok(StoredState::encode(&module)?)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quire_core::{EffectLog, HeadState, Langcode, SideEffect};
    use serde_json::json;

    fn render<M: Module + ?Sized>(module: &M) -> (Result<String, ModuleError>, EffectLog) {
        let templates = builtin_templates();
        let head = HeadState::new();
        let mut effects = EffectLog::new();
        let language = Langcode::new("en");
        let result = {
            let mut scope = RenderScope::new(&templates, &head, &mut effects, &language);
            module.render(module.default_template(), &mut scope)
        };
        (result, effects)
    }

    #[test]
    fn registry_knows_builtins() {
        let registry = builtin_registry();
        let ids: Vec<_> = registry.type_ids().collect();
        assert_eq!(ids, vec!["heading", "stylesheet", "text"]);
    }

    #[test]
    fn heading_escapes_and_clamps() {
        let heading = HeadingModule {
            title: "Fish & <Chips>".into(),
            level: 9,
        };
        let (out, _) = render(&heading);
        assert_eq!(out.unwrap(), "<h6>Fish &amp; &lt;Chips&gt;</h6>");
    }

    #[test]
    fn untitled_heading_fails() {
        let (out, _) = render(&HeadingModule::default());
        assert!(matches!(out, Err(ModuleError::Render(_))));
    }

    #[test]
    fn stylesheet_records_effect() {
        let sheet = StylesheetModule {
            href: "/site.css".into(),
        };
        let (out, effects) = render(&sheet);
        assert_eq!(out.unwrap(), "");
        assert_eq!(effects.effects(), &[SideEffect::Stylesheet("/site.css".into())]);
        assert!(!sheet.is_enabled_by_default());
    }

    #[test]
    fn json_state_round_trips_through_registry() {
        let bytes = encode_json_state("text", json!({"body": "<p>hello</p>"})).unwrap();
        let registry = builtin_registry();
        let module = registry.decode_state("text", &bytes).unwrap().unwrap();
        let (out, _) = render(module.as_ref());
        assert_eq!(out.unwrap(), "<p>hello</p>");
    }

    #[test]
    fn json_state_rejects_unknown_type_and_bad_shape() {
        assert!(matches!(
            encode_json_state("video", json!({})),
            Err(StateJsonError::UnknownType(_))
        ));
        assert!(matches!(
            encode_json_state("heading", json!({"level": "big"})),
            Err(StateJsonError::Json { .. })
        ));
    }
}
