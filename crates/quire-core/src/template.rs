//! # Template Boundary
//!
//! The engine treats templates as opaque: `render(template_id, variables)`.
//! [`MemoryTemplates`] is a minimal engine that substitutes `{{ name }}`
//! placeholders; anything richer plugs in through [`TemplateEngine`].

use std::collections::BTreeMap;
use thiserror::Error;

pub type TemplateVars = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("unclosed placeholder in template {template} at byte {offset}")]
    Unclosed { template: String, offset: usize },
}

pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, TemplateError>;

    fn exists(&self, template: &str) -> bool;
}

/// Templates held in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplates {
    sources: BTreeMap<String, String>,
}

impl MemoryTemplates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(id, source);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(id.into(), source.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl TemplateEngine for MemoryTemplates {
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
        let source = self
            .sources
            .get(template)
            .ok_or_else(|| TemplateError::NotFound(template.to_string()))?;

        let mut out = String::with_capacity(source.len());
        let mut rest = source.as_str();
        let mut consumed = 0;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| TemplateError::Unclosed {
                template: template.to_string(),
                offset: consumed + start,
            })?;
            // Unknown variables render empty.
            if let Some(value) = vars.get(after[..end].trim()) {
                out.push_str(value);
            }
            let advance = start + 2 + end + 2;
            consumed += advance;
            rest = &rest[advance..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn exists(&self, template: &str) -> bool {
        self.sources.contains_key(template)
    }
}
