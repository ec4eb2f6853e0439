//! # Generator Configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use crate::cache::CacheLifetime;
use serde::{Deserialize, Serialize};

/// Default interval between auto-publish scans when nothing is scheduled.
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Default lifetime of the cross-process publish lock.
pub const DEFAULT_PUBLISH_LOCK_SECS: u64 = 30;

/// Upper bound on BasePage links followed before giving up.
pub const DEFAULT_MAX_ANCESTRY_DEPTH: usize = 64;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Enables per-module profiling, error detail in output, and the
    /// render-only-module debug filter.
    pub development_mode: bool,

    pub profiling: ProfilingThresholds,

    /// Page cache lifetime for pages that do not set one.
    /// 0 = never cache, negative = forever, positive = seconds.
    pub default_page_cache_lifetime: CacheLifetime,

    /// Sentinel lifetime when no revision is scheduled.
    pub publish_check_interval_secs: u64,

    /// Lifetime of the lock key taken while a publish pass runs.
    pub publish_lock_secs: u64,

    pub max_ancestry_depth: usize,

    /// Capacity of the in-memory cache built by the app.
    pub cache_capacity: usize,

    /// Write the natural module order as sort entries the first time a
    /// revision without any ordering is rendered.
    pub persist_natural_order: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            development_mode: false,
            profiling: ProfilingThresholds::default(),
            default_page_cache_lifetime: CacheLifetime::NEVER,
            publish_check_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            publish_lock_secs: DEFAULT_PUBLISH_LOCK_SECS,
            max_ancestry_depth: DEFAULT_MAX_ANCESTRY_DEPTH,
            cache_capacity: 10_000,
            persist_natural_order: true,
        }
    }
}

/// Development-mode limits. A module exceeding any of them is flagged in the
/// log and in its [`crate::pipeline::ModuleReport`]; rendering continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingThresholds {
    pub max_wall_micros: u64,
    pub max_cpu_micros: u64,
    pub max_memory_bytes: u64,
    pub max_queries: u64,
}

impl Default for ProfilingThresholds {
    fn default() -> Self {
        Self {
            max_wall_micros: 50_000,
            max_cpu_micros: 50_000,
            max_memory_bytes: 8 * 1024 * 1024,
            max_queries: 20,
        }
    }
}
