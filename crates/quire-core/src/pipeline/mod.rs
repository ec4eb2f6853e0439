//! # Generation Pipeline
//!
//! Turns a page revision into a response.
//!
//! ## Stages
//!
//! 1. Resolve the revision's ancestry chain and its ordered module list.
//! 2. For each module, strictly in order:
//!    resolve overrides, instantiate, skip if disabled, then either replay
//!    a cached render or render fresh (and cache it if the module declares
//!    cache properties). Effects are applied to the page [`HeadState`]
//!    before the next module runs.
//! 3. Render the revision's root template with one variable per slot plus
//!    `head`, `page_name` and `language`.
//!
//! [`Generator::serve`] wraps this with the auto-publish check and the page
//! cache.
//!
//! ## Failure policy
//!
//! Nothing a single module does can abort the page. Resolution,
//! instantiation and render failures leave that module's contribution
//! empty (in development mode an HTML comment names the error) and are
//! reported in [`ModuleReport`]. A broken ancestry chain renders the page
//! with no modules. Only store failures, a missing revision, and a root
//! template failure are errors.

mod profile;


pub use profile::ModuleProfile;

use crate::ancestry::{Ancestry, AncestryResolver};
use crate::cache::{
    CachedModule, CachedPage, Lookup, ModuleCache, PageCache, SingleFlight, Ttl,
    module_fingerprint,
};
use crate::context::GenerationContext;
use crate::effects::{EffectLog, HeadState};
use crate::model::{Page, PageModule, RevisionSelector};
use crate::module::{ModuleError, RenderScope};
use crate::ordering::resolve_module_order;
use crate::registry::ModuleInstance;
use crate::resolver::ModuleOverrideResolver;
use crate::scheduler::AutoPublishScheduler;
use crate::store::StoreError;
use crate::template::{TemplateError, TemplateVars};
use crate::{Langcode, ModuleId, PageId, RevisionId};
use profile::Probe;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info_span, warn};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no page at {0}")]
    PageNotFound(String),

    #[error("page {0} not found")]
    MissingPage(PageId),

    #[error("page {0} has no revision to render")]
    NoRevision(PageId),

    #[error("revision {0} not found")]
    RevisionNotFound(RevisionId),

    #[error("root template failed: {0}")]
    Template(#[from] TemplateError),
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Other,
}

impl Method {
    /// Read-only requests; only these may use the page cache.
    #[must_use]
    pub fn is_safe(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl From<&str> for Method {
    fn from(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            _ => Self::Other,
        }
    }
}

/// What the HTTP boundary knows about a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub language: Langcode,
    pub revision: RevisionSelector,
    /// Render only this module. Honoured in development mode only.
    pub only_module: Option<ModuleId>,
}

impl RequestContext {
    /// A GET for `path` in the generic language.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<Langcode>) -> Self {
        self.language = language.into();
        self
    }

    #[must_use]
    pub fn with_revision(mut self, revision: RevisionSelector) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn with_only_module(mut self, module: ModuleId) -> Self {
        self.only_module = Some(module);
        self
    }

    /// Page cache key input.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }
}

/// Transport-neutral response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl PageResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    Rendered,
    CacheHit,
    Disabled,
    /// Excluded by the render-only-module filter.
    Filtered,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    pub module: ModuleId,
    pub module_type: String,
    pub slot: String,
    pub status: ModuleStatus,
    /// Development mode only.
    pub profile: Option<ModuleProfile>,
    /// Profiling thresholds this module exceeded.
    pub over_limits: Vec<&'static str>,
}

/// Full result of [`Generator::render`].
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page: PageId,
    pub revision: RevisionId,
    pub slots: BTreeMap<String, String>,
    pub head: HeadState,
    pub response: PageResponse,
    pub modules: Vec<ModuleReport>,
}

/// Result of [`Generator::serve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub page: PageId,
    pub revision: RevisionId,
    pub response: PageResponse,
    pub from_cache: bool,
}

// =============================================================================
// GENERATOR
// =============================================================================

pub struct Generator {
    ctx: GenerationContext,
    flight: SingleFlight,
    scheduler: AutoPublishScheduler,
}

impl Generator {
    #[must_use]
    pub fn new(ctx: GenerationContext) -> Self {
        Self {
            ctx,
            flight: SingleFlight::new(),
            scheduler: AutoPublishScheduler::new(),
        }
    }

    #[must_use]
    pub fn context(&self) -> &GenerationContext {
        &self.ctx
    }

    #[must_use]
    pub fn scheduler(&self) -> &AutoPublishScheduler {
        &self.scheduler
    }

    /// Serve a request: publish check, page lookup by path, page cache,
    /// then generation.
    pub fn serve(&self, req: &RequestContext) -> Result<Served, GenerateError> {
        if let Err(err) = self.scheduler.check(&self.ctx) {
            warn!(error = %err, "auto-publish check failed");
        }

        let page = self
            .ctx
            .store
            .page_by_url(&req.path)?
            .ok_or_else(|| GenerateError::PageNotFound(req.path.clone()))?;

        let ttl = self.page_cache_ttl(&page, req);
        let path_and_query = req.path_and_query();
        let cache = PageCache::new(self.ctx.cache.as_ref());

        if ttl.is_some() {
            if let Lookup::Found(hit) = cache.lookup(&path_and_query) {
                return Ok(Served {
                    page: hit.page,
                    revision: hit.revision,
                    response: PageResponse {
                        status: 200,
                        headers: hit.headers,
                        body: hit.body,
                    },
                    from_cache: true,
                });
            }
        }

        let rendered = self.render_page(&page, req)?;
        if let Some(ttl) = ttl {
            cache.store(
                &path_and_query,
                &CachedPage {
                    page: rendered.page,
                    revision: rendered.revision,
                    headers: rendered.response.headers.clone(),
                    body: rendered.response.body.clone(),
                },
                ttl,
            );
        }

        Ok(Served {
            page: rendered.page,
            revision: rendered.revision,
            response: rendered.response,
            from_cache: false,
        })
    }

    /// Render the revision of `page` picked by the request's selector.
    pub fn render_page(&self, page: &Page, req: &RequestContext) -> Result<RenderedPage, GenerateError> {
        let revision = page
            .select(req.revision)
            .ok_or(GenerateError::NoRevision(page.id))?;
        self.render(revision, req)
    }

    /// Generate `revision` without touching the page cache.
    pub fn render(&self, revision: RevisionId, req: &RequestContext) -> Result<RenderedPage, GenerateError> {
        let store = self.ctx.store.as_ref();
        let rev = store
            .revision(revision)?
            .ok_or(GenerateError::RevisionNotFound(revision))?;
        let page = store
            .page(rev.page)?
            .ok_or(GenerateError::MissingPage(rev.page))?;

        let mut head = HeadState::new();
        let mut slots: BTreeMap<String, String> = BTreeMap::new();
        let mut reports = Vec::new();

        match AncestryResolver::new(store, self.ctx.config.max_ancestry_depth).resolve(&rev) {
            Ok(ancestry) => {
                let ordered =
                    resolve_module_order(store, &ancestry, self.ctx.config.persist_natural_order)?;
                let only = req.only_module.filter(|_| self.ctx.config.development_mode);

                for module in &ordered.modules {
                    let slot = slots.entry(module.target.clone()).or_default();
                    if only.is_some_and(|id| id != module.id) {
                        reports.push(module_report(module, ModuleStatus::Filtered, None));
                        continue;
                    }
                    let (content, report) = self.render_module(&ancestry, module, &req.language, &mut head);
                    slot.push_str(&content);
                    reports.push(report);
                }
            }
            Err(err) => {
                error!(revision = %revision, error = %err, "ancestry broken, rendering without modules");
            }
        }

        let mut vars: TemplateVars = slots.clone();
        vars.insert("head".into(), head.render());
        vars.insert("page_name".into(), page.name.clone());
        vars.insert("language".into(), req.language.as_str().to_string());
        let body = self.ctx.templates.render(&rev.template, &vars)?;

        let mut headers = vec![("Content-Type".to_string(), "text/html; charset=utf-8".to_string())];
        if !req.language.is_generic() {
            headers.push(("Content-Language".into(), req.language.as_str().to_string()));
        }
        for (name, value) in head.headers() {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        Ok(RenderedPage {
            page: page.id,
            revision,
            slots,
            head,
            response: PageResponse {
                status: 200,
                headers,
                body,
            },
            modules: reports,
        })
    }

    fn page_cache_ttl(&self, page: &Page, req: &RequestContext) -> Option<Ttl> {
        let debug_filtered = req.only_module.is_some() && self.ctx.config.development_mode;
        if req.revision != RevisionSelector::Active || debug_filtered {
            return None;
        }
        let lifetime = page
            .cache_lifetime
            .unwrap_or(self.ctx.config.default_page_cache_lifetime);
        PageCache::eligibility(req.method.is_safe(), lifetime)
    }

    /// One module: content for its slot plus its report. Never fails.
    fn render_module(
        &self,
        ancestry: &Ancestry,
        module: &PageModule,
        language: &Langcode,
        head: &mut HeadState,
    ) -> (String, ModuleReport) {
        let span = info_span!(
            "module",
            id = %module.id,
            module_type = %module.module_type,
            slot = %module.target
        );
        let _entered = span.enter();

        let dev = self.ctx.config.development_mode;
        let probe = dev.then(|| Probe::start(self.ctx.store.query_count()));

        let (content, status) = match self.produce(ancestry, module, language, head) {
            Ok(Produced::Disabled) => (String::new(), ModuleStatus::Disabled),
            Ok(Produced::Output { entry, cache_hit }) => {
                head.apply(&entry.effects);
                let status = if cache_hit {
                    ModuleStatus::CacheHit
                } else {
                    ModuleStatus::Rendered
                };
                (entry.content, status)
            }
            Err(failure) => {
                let message = failure.to_string();
                let content = if dev {
                    format!("<!-- module {} failed: {} -->", module.id, message.replace("--", "- -"))
                } else {
                    String::new()
                };
                (content, ModuleStatus::Failed(message))
            }
        };

        let profile = probe.map(|probe| probe.finish(self.ctx.store.query_count()));
        let mut report = module_report(module, status, profile);
        if let Some(profile) = profile {
            report.over_limits = profile.breaches(&self.ctx.config.profiling);
            if !report.over_limits.is_empty() {
                warn!(
                    over = ?report.over_limits,
                    wall_micros = profile.wall_micros,
                    queries = profile.queries,
                    "module exceeded profiling thresholds"
                );
            }
        }
        (content, report)
    }

    fn produce(
        &self,
        ancestry: &Ancestry,
        module: &PageModule,
        language: &Langcode,
        head: &HeadState,
    ) -> Result<Produced, ModuleFailure> {
        let view = ModuleOverrideResolver::new(self.ctx.store.as_ref(), self.ctx.config.max_ancestry_depth)
            .resolve_in(ancestry, module.id, language)
            .map_err(|err| {
                error!(error = %err, "module overrides could not be read");
                ModuleFailure::Resolve(err)
            })?;

        if view.enabled == Some(false) {
            debug!("module disabled");
            return Ok(Produced::Disabled);
        }

        let instance = self
            .ctx
            .registry
            .instantiate(&view, &module.module_type)
            .map_err(|err| {
                error!(error = %err, "module could not be instantiated");
                ModuleFailure::Instantiate(err)
            })?;

        let enabled = view
            .enabled
            .unwrap_or_else(|| instance.module().is_enabled_by_default());
        if !enabled {
            debug!("module disabled");
            return Ok(Produced::Disabled);
        }

        let template = view
            .template
            .clone()
            .unwrap_or_else(|| instance.module().default_template().to_string());

        let Some(props) = instance.module().cache_properties() else {
            let entry = self.render_fresh(&instance, &template, head, language)?;
            return Ok(Produced::Output {
                entry,
                cache_hit: false,
            });
        };

        let key = module_fingerprint(
            module.id,
            instance.data_provenance(),
            &template,
            &props.params_for(language),
        );
        let cache = ModuleCache::new(self.ctx.cache.as_ref());
        let outcome: Result<(CachedModule, bool), ModuleFailure> = self.flight.run(
            key.as_str(),
            || cache.lookup(&key).map(|entry| Ok((entry, true))),
            || {
                let entry = self.render_fresh(&instance, &template, head, language)?;
                cache.store(&key, &entry, props.lifetime);
                Ok((entry, false))
            },
        );
        let (entry, cache_hit) = outcome?;
        Ok(Produced::Output { entry, cache_hit })
    }

    fn render_fresh(
        &self,
        instance: &ModuleInstance,
        template: &str,
        head: &HeadState,
        language: &Langcode,
    ) -> Result<CachedModule, ModuleFailure> {
        let mut effects = EffectLog::new();
        let content = {
            let mut scope = RenderScope::new(self.ctx.templates.as_ref(), head, &mut effects, language);
            instance.module().render(template, &mut scope)
        }
        .map_err(|err| {
            warn!(error = %err, "module render failed");
            ModuleFailure::Render(err)
        })?;
        Ok(CachedModule { content, effects })
    }
}

enum Produced {
    Disabled,
    Output { entry: CachedModule, cache_hit: bool },
}

#[derive(Debug, Error)]
enum ModuleFailure {
    #[error("overrides unavailable: {0}")]
    Resolve(StoreError),

    #[error(transparent)]
    Instantiate(crate::registry::InstantiateError),

    #[error(transparent)]
    Render(ModuleError),
}

fn module_report(module: &PageModule, status: ModuleStatus, profile: Option<ModuleProfile>) -> ModuleReport {
    ModuleReport {
        module: module.id,
        module_type: module.module_type.clone(),
        slot: module.target.clone(),
        status,
        profile,
        over_limits: Vec::new(),
    }
}
