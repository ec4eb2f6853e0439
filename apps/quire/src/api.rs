//! # HTTP API
//!
//! axum router for page delivery and the editor API.
//!
//! ## Routes
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Liveness probe |
//! | PUT | `/api/modules/{module}/revisions/{revision}/data` | Patch an override row |
//! | POST | `/api/publish/run` | Force an auto-publish pass |
//! | any | everything else | Page delivery by URL |
//!
//! Page delivery accepts `lang`, `revision=working` and `module=<id>`
//! query parameters. Editor routes require `Authorization: Bearer <key>`
//! and share one rate limiter. Generation is synchronous and runs on the
//! blocking pool.

use crate::cli::{CliError, build_generator, open_store};
use crate::config::AppConfig;
use crate::modules::encode_json_state;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use quire_core::{
    EditError, Editor, FieldPatch, GenerateError, Generator, Langcode, Method, ModuleId,
    OverridePatch, PageResponse, PublishCheck, RequestContext, RevisionId, RevisionSelector,
    SystemClock,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Response header telling whether the page came from the page cache.
pub const CACHE_HEADER: &str = "x-quire-cache";

// =============================================================================
// STATE
// =============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    generator: Arc<Generator>,
    api_key: Option<Arc<str>>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl AppState {
    #[must_use]
    pub fn new(generator: Generator, config: &AppConfig) -> Self {
        let per_second = NonZeroU32::new(config.rate_limit_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            generator: Arc::new(generator),
            api_key: config.api_key.as_deref().map(Arc::from),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        }
    }

    #[must_use]
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    fn development_mode(&self) -> bool {
        self.generator.context().config.development_mode
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(key) = &self.api_key else {
            return false;
        };
        let Some(token) = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
        else {
            return false;
        };
        token.as_bytes().ct_eq(key.as_bytes()).into()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Standard API error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (status, body).into_response()
    }
}

impl From<EditError> for ApiError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::UnknownModule(_) | EditError::UnknownRevision(_) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            EditError::DuplicateModule { .. } => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(err)
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the complete router.
pub fn router(state: AppState) -> Router {
    let editor = Router::new()
        .route(
            "/api/modules/{module}/revisions/{revision}/data",
            put(update_override),
        )
        .route("/api/publish/run", post(run_publish))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_editor));

    Router::new()
        .route("/health", get(health))
        .merge(editor)
        .fallback(serve_page)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Open the database, build the generator, and serve until Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<(), CliError> {
    let store = open_store(&config.database)?;
    let generator = build_generator(&config, Arc::new(store), Arc::new(SystemClock))?;
    if config.api_key.is_none() {
        warn!("no api_key configured, editor API disabled");
    }
    let app = router(AppState::new(generator, &config));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .map_err(CliError::Server)?;
    info!(listen = %config.listen, "quire listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(CliError::Server)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn require_editor(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.api_key.is_none() {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "editor API disabled"));
    }
    if state.limiter.check().is_err() {
        return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"));
    }
    if !state.authorized(request.headers()) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid or missing api key"));
    }
    Ok(next.run(request).await)
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageParams {
    pub lang: Option<String>,
    pub revision: Option<String>,
    pub module: Option<u64>,
}

async fn serve_page(
    State(state): State<AppState>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Response {
    let mut request = RequestContext::get(uri.path())
        .with_method(Method::from(method.as_str()))
        .with_query(uri.query().unwrap_or_default());
    if let Some(lang) = params.lang.as_deref() {
        request = request.with_language(lang);
    }
    match params.revision.as_deref() {
        None => {}
        Some("working") => {
            if !state.development_mode() && !state.authorized(&headers) {
                return ApiError::new(StatusCode::UNAUTHORIZED, "working revision requires api key")
                    .into_response();
            }
            request = request.with_revision(RevisionSelector::Working);
        }
        Some(other) => {
            return ApiError::new(StatusCode::BAD_REQUEST, format!("unknown revision {other}"))
                .into_response();
        }
    }
    if let Some(module) = params.module {
        request = request.with_only_module(ModuleId(module));
    }

    let generator = Arc::clone(&state.generator);
    let outcome = tokio::task::spawn_blocking(move || generator.serve(&request)).await;
    match outcome {
        Ok(Ok(served)) => {
            let mut response = page_response(served.response);
            let cache = if served.from_cache { "hit" } else { "miss" };
            response
                .headers_mut()
                .insert(CACHE_HEADER, HeaderValue::from_static(cache));
            response
        }
        Ok(Err(GenerateError::PageNotFound(_) | GenerateError::NoRevision(_))) => {
            (StatusCode::NOT_FOUND, "page not found").into_response()
        }
        Ok(Err(err)) => {
            error!(error = %err, path = %uri.path(), "page generation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Emit a stored response verbatim.
fn page_response(page: PageResponse) -> Response {
    let status = StatusCode::from_u16(page.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, page.body).into_response();
    let headers = response.headers_mut();
    for (name, value) in &page.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    response
}

/// Absent keeps the stored value, `null` clears it.
fn patch_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn to_patch<T>(field: Option<Option<T>>) -> FieldPatch<T> {
    match field {
        None => FieldPatch::Keep,
        Some(None) => FieldPatch::Inherit,
        Some(Some(value)) => FieldPatch::Set(value),
    }
}

/// Body of an override update.
///
/// `state` is JSON for the module's type; `state_base64` is an already
/// encoded state envelope. At most one of them may be given.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OverrideRequest {
    pub langcode: String,
    #[serde(deserialize_with = "patch_field")]
    pub template: Option<Option<String>>,
    #[serde(deserialize_with = "patch_field")]
    pub enabled: Option<Option<bool>>,
    #[serde(deserialize_with = "patch_field")]
    pub state: Option<Option<serde_json::Value>>,
    pub state_base64: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideResponse {
    /// Row id, or `None` when the update left the row empty and it was
    /// removed.
    pub row: Option<u64>,
    pub invalidated: bool,
}

async fn update_override(
    State(state): State<AppState>,
    Path((module, revision)): Path<(u64, u64)>,
    Json(body): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    let generator = Arc::clone(&state.generator);
    tokio::task::spawn_blocking(move || {
        apply_override(&generator, ModuleId(module), RevisionId(revision), body)
    })
    .await?
    .map(Json)
}

fn apply_override(
    generator: &Generator,
    module: ModuleId,
    revision: RevisionId,
    body: OverrideRequest,
) -> Result<OverrideResponse, ApiError> {
    let ctx = generator.context();
    let page_module = ctx
        .store
        .module(module)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("module {module} not found")))?;

    let data = match (body.state, body.state_base64) {
        (Some(_), Some(_)) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "give state or state_base64, not both",
            ));
        }
        (Some(Some(json)), None) => FieldPatch::Set(
            encode_json_state(&page_module.module_type, json)
                .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?,
        ),
        (Some(None), None) => FieldPatch::Inherit,
        (None, Some(encoded)) => FieldPatch::Set(
            BASE64
                .decode(encoded.as_bytes())
                .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("state_base64: {err}")))?,
        ),
        (None, None) => FieldPatch::Keep,
    };
    let patch = OverridePatch {
        template: to_patch(body.template),
        enabled: to_patch(body.enabled),
        data,
    };

    let langcode = Langcode::new(body.langcode);
    let row = Editor::new(ctx.store.as_ref()).set_override(module, revision, &langcode, patch)?;
    let invalidated = match Editor::invalidate_cached(ctx, module, revision, &langcode) {
        Ok(removed) => removed,
        Err(err) => {
            warn!(module = %module, revision = %revision, error = %err, "could not invalidate cached module");
            false
        }
    };
    Ok(OverrideResponse {
        row: row.map(|row| row.id.0),
        invalidated,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub status: String,
    pub published: Vec<u64>,
    pub next_check_in: Option<u64>,
}

async fn run_publish(State(state): State<AppState>) -> Result<Json<PublishResponse>, ApiError> {
    let generator = Arc::clone(&state.generator);
    let check = tokio::task::spawn_blocking(move || {
        generator.scheduler().run(generator.context())
    })
    .await?
    .map_err(ApiError::internal)?;

    let response = match check {
        PublishCheck::Ran(report) => PublishResponse {
            status: "ran".into(),
            published: report.published.iter().map(|id| id.0).collect(),
            next_check_in: Some(report.next_check_in),
        },
        PublishCheck::Busy => PublishResponse {
            status: "busy".into(),
            published: Vec::new(),
            next_check_in: None,
        },
        PublishCheck::NotDue => PublishResponse {
            status: "not_due".into(),
            published: Vec::new(),
            next_check_in: None,
        },
    };
    Ok(Json(response))
}
