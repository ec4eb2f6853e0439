//! # CLI Commands
//!
//! The command implementations behind `main.rs`. Each command opens the
//! redb database itself and returns a typed result; printing is left to
//! the caller.

use crate::config::{AppConfig, ConfigError};
use crate::modules::builtin_registry;
use crate::site::{ImportSummary, SiteError, SiteFile, import_site};
use quire_core::{
    Clock, ContentStore, GenerateError, GenerationContext, Generator, MemoryCache, PublishCheck,
    PublishError, RedbStore, RequestContext, RevisionSelector, Served, StoreError, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("database already exists: {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("database not found: {0} (run `quire init` first)")]
    MissingDatabase(PathBuf),

    #[error("cannot remove {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Site(#[from] SiteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

// =============================================================================
// HELPERS
// =============================================================================

/// Open an existing database.
pub fn open_store(db_path: &Path) -> Result<RedbStore, CliError> {
    if !db_path.exists() {
        return Err(CliError::MissingDatabase(db_path.to_path_buf()));
    }
    Ok(RedbStore::open(db_path)?)
}

/// Wire a generator over `store` with the built-in modules, the configured
/// templates, and an in-process cache.
pub fn build_generator(
    config: &AppConfig,
    store: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
) -> Result<Generator, CliError> {
    let templates = config.load_templates()?;
    let cache = MemoryCache::new(config.generator.cache_capacity, Arc::clone(&clock));
    let ctx = GenerationContext::new(
        store,
        Arc::new(cache),
        Arc::new(templates),
        Arc::new(builtin_registry()),
        clock,
    )
    .with_config(config.generator.clone());
    Ok(Generator::new(ctx))
}

fn generator_for(config: &AppConfig) -> Result<Generator, CliError> {
    let store = open_store(&config.database)?;
    build_generator(config, Arc::new(store), Arc::new(SystemClock))
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Create an empty database.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), CliError> {
    if db_path.exists() {
        if !force {
            return Err(CliError::AlreadyExists(db_path.to_path_buf()));
        }
        std::fs::remove_file(db_path).map_err(|source| CliError::Io {
            path: db_path.to_path_buf(),
            source,
        })?;
    }
    RedbStore::open(db_path)?;
    info!(path = %db_path.display(), "database initialized");
    Ok(())
}

/// Seed the database from a JSON site file. The database is created if it
/// does not exist.
pub fn cmd_import(db_path: &Path, site_path: &Path) -> Result<ImportSummary, CliError> {
    let site = SiteFile::load(site_path)?;
    let store = RedbStore::open(db_path)?;
    Ok(import_site(&store, &site)?)
}

/// Render one URL the way the server would.
pub fn cmd_render(
    config: &AppConfig,
    url: &str,
    lang: Option<&str>,
    working: bool,
) -> Result<Served, CliError> {
    let generator = generator_for(config)?;
    let mut request = RequestContext::get(url);
    if let Some(lang) = lang {
        request = request.with_language(lang);
    }
    if working {
        request = request.with_revision(RevisionSelector::Working);
    }
    Ok(generator.serve(&request)?)
}

/// Run an auto-publish pass now.
pub fn cmd_publish(config: &AppConfig) -> Result<PublishCheck, CliError> {
    let generator = generator_for(config)?;
    let check = generator.scheduler().run(generator.context())?;
    if let PublishCheck::Ran(report) = &check {
        info!(
            published = report.published.len(),
            next_check_in = report.next_check_in,
            "publish pass complete"
        );
    }
    Ok(check)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn open_store_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.redb");
        assert!(matches!(open_store(&path), Err(CliError::MissingDatabase(_))));
    }

    #[test]
    fn render_without_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database: dir.path().join("missing.redb"),
            ..AppConfig::default()
        };
        assert!(matches!(
            cmd_render(&config, "/", None, false),
            Err(CliError::MissingDatabase(_))
        ));
    }
}
