//! Explicit collaborators threaded through generation.

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::GeneratorConfig;
use crate::registry::ModuleRegistry;
use crate::store::ContentStore;
use crate::template::TemplateEngine;
use std::sync::Arc;

/// Everything the engine talks to. Cloning is cheap.
#[derive(Clone)]
pub struct GenerationContext {
    pub store: Arc<dyn ContentStore>,
    pub cache: Arc<dyn CacheStore>,
    pub templates: Arc<dyn TemplateEngine>,
    pub registry: Arc<ModuleRegistry>,
    pub clock: Arc<dyn Clock>,
    pub config: GeneratorConfig,
}

impl GenerationContext {
    #[must_use]
    pub fn new(
        store: Arc<dyn ContentStore>,
        cache: Arc<dyn CacheStore>,
        templates: Arc<dyn TemplateEngine>,
        registry: Arc<ModuleRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            templates,
            registry,
            clock,
            config: GeneratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }
}
