//! # Render Side Effects
//!
//! Modules contribute more than their slot content: head tags, stylesheets,
//! scripts, response headers. A module records them in an [`EffectLog`]
//! while rendering; the pipeline applies the log to the page's
//! [`HeadState`]. The module cache stores the log next to the content so a
//! cache hit reproduces the same effects without running the module.

use serde::{Deserialize, Serialize};

/// One effect recorded during a module render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    /// Raw markup for the document head.
    HeadTag(String),
    Stylesheet(String),
    Script(String),
    /// Response header (name, value).
    Header(String, String),
}

/// Ordered effects of one module render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectLog {
    effects: Vec<SideEffect>,
}

impl EffectLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, effect: SideEffect) {
        self.effects.push(effect);
    }

    #[must_use]
    pub fn effects(&self) -> &[SideEffect] {
        &self.effects
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Accumulated page-level state built from every module's effects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadState {
    head_tags: Vec<String>,
    stylesheets: Vec<String>,
    scripts: Vec<String>,
    headers: Vec<(String, String)>,
}

impl HeadState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a log in order. Stylesheet and script URLs are de-duplicated;
    /// a repeated header name replaces the earlier value.
    pub fn apply(&mut self, log: &EffectLog) {
        for effect in log.effects() {
            match effect {
                SideEffect::HeadTag(tag) => self.head_tags.push(tag.clone()),
                SideEffect::Stylesheet(href) => {
                    if !self.stylesheets.contains(href) {
                        self.stylesheets.push(href.clone());
                    }
                }
                SideEffect::Script(src) => {
                    if !self.scripts.contains(src) {
                        self.scripts.push(src.clone());
                    }
                }
                SideEffect::Header(name, value) => {
                    self.headers
                        .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
                    self.headers.push((name.clone(), value.clone()));
                }
            }
        }
    }

    #[must_use]
    pub fn has_stylesheet(&self, href: &str) -> bool {
        self.stylesheets.iter().any(|s| s == href)
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Markup for the document head.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for href in &self.stylesheets {
            out.push_str(&format!("<link rel=\"stylesheet\" href=\"{href}\">\n"));
        }
        for tag in &self.head_tags {
            out.push_str(tag);
            out.push('\n');
        }
        for src in &self.scripts {
            out.push_str(&format!("<script src=\"{src}\"></script>\n"));
        }
        out
    }
}
