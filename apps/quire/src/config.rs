//! # Application Configuration
//!
//! JSON configuration for the binary. Every field has a default, so a
//! missing file or a partial document is valid. CLI flags override the
//! loaded values in `main.rs`.

use crate::modules::builtin_templates;
use quire_core::{GeneratorConfig, MemoryTemplates};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default database file.
pub const DEFAULT_DATABASE: &str = "quire.redb";

/// Default editor API rate limit.
pub const DEFAULT_RATE_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: String,
    pub database: PathBuf,
    /// Bearer token for the editor API. Editor endpoints are disabled when
    /// unset.
    pub api_key: Option<String>,
    pub rate_limit_per_second: u32,
    /// Directory of `*.html` templates, each named by its file stem.
    pub templates_dir: Option<PathBuf>,
    pub generator: GeneratorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
            api_key: None,
            rate_limit_per_second: DEFAULT_RATE_LIMIT,
            templates_dir: None,
            generator: GeneratorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A file that does not exist yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_per_second == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_per_second must be at least 1".into(),
            ));
        }
        if self.generator.max_ancestry_depth == 0 {
            return Err(ConfigError::Invalid(
                "generator.max_ancestry_depth must be at least 1".into(),
            ));
        }
        if matches!(&self.api_key, Some(key) if key.trim().is_empty()) {
            return Err(ConfigError::Invalid("api_key must not be empty".into()));
        }
        Ok(())
    }

    /// Built-in templates, overlaid with the files of `templates_dir`.
    pub fn load_templates(&self) -> Result<MemoryTemplates, ConfigError> {
        let mut templates = builtin_templates();
        let Some(dir) = &self.templates_dir else {
            return Ok(templates);
        };

        let io_err = |source| ConfigError::Io {
            path: dir.clone(),
            source,
        };
        let mut entries = std::fs::read_dir(dir)
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        entries.sort_by_key(std::fs::DirEntry::path);

        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(template = name, "template loaded");
            templates.insert(name, source);
        }
        Ok(templates)
    }
}

// =============================================================================
// TESTS
// =============================================================================
