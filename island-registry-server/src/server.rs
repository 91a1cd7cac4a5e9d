// island-registry-server/src/server.rs
// ============================================================================
// Module: Registry HTTP Surface
// Description: Axum routes for registration and discovery under /v1.
// Purpose: Enforce rate limits, authentication, and the wire error shape.
// Dependencies: axum, island-registry-core, tokio
// ============================================================================

//! ## Overview
//! Every route runs the same pipeline: rate limit, then authentication where
//! the operation requires it, then the coordinator or discovery engine.
//! Responses are JSON with a stable shape; errors use
//! `{"error": {"code", "message", "details"}}`. Internal failures are logged
//! with a correlation id and returned opaquely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::DefaultBodyLimit;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use island_registry_core::InMemoryRegistryStore;
use island_registry_core::PackageName;
use island_registry_core::PrincipalId;
use island_registry_core::RegistryError;
use island_registry_core::RegistryStore;
use island_registry_core::Version;
use island_registry_core::now_millis;
use island_registry_store_sqlite::SqliteRegistryStore;
use island_registry_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::audit::AuditSink;
use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::RegistryAuditEvent;
use crate::audit::StderrAuditSink;
use crate::auth::AuthenticatedPrincipal;
use crate::auth::FederatedVerifier;
use crate::auth::IdentityService;
use crate::auth::parse_bearer_token;
use crate::auth::token_fingerprint;
use crate::config::RegistryConfig;
use crate::config::StoreType;
use crate::coordinator::PublishLimits;
use crate::coordinator::RegistrationCoordinator;
use crate::coordinator::RegistrationRequest;
use crate::discovery::DiscoveryEngine;
use crate::discovery::SearchQuery;
use crate::fetcher::HttpArtifactFetcher;
use crate::ratelimit::RateLimitDecision;
use crate::ratelimit::RateLimiter;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server construction and serving failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failure.
    #[error("server config error: {0}")]
    Config(String),
    /// Component initialization failure.
    #[error("server init error: {0}")]
    Init(String),
    /// Transport failure while serving.
    #[error("server transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Registry HTTP server.
pub struct RegistryServer {
    /// Bind address.
    bind: SocketAddr,
    /// Shared handler state.
    state: Arc<AppState>,
}

/// Shared state behind every handler.
pub struct AppState {
    /// Registration pipeline.
    coordinator: RegistrationCoordinator,
    /// Discovery engine.
    discovery: DiscoveryEngine,
    /// Identity service.
    identity: IdentityService,
    /// Rate limiter.
    rate_limiter: RateLimiter,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Monotonic request counter for correlation ids.
    request_counter: AtomicU64,
}

impl RegistryServer {
    /// Builds a server from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when a component cannot be initialized.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let bind: SocketAddr = config
            .server
            .bind
            .parse()
            .map_err(|_| ServerError::Config("invalid bind address".to_string()))?;

        let store = build_store(config)?;
        let audit = build_audit_sink(config)?;
        let fetcher = HttpArtifactFetcher::new(config.fetch.clone())
            .map_err(|err| ServerError::Init(err.to_string()))?;
        let federated = config
            .federated
            .clone()
            .map(FederatedVerifier::new)
            .transpose()
            .map_err(|err| ServerError::Init(err.to_string()))?;

        let coordinator = RegistrationCoordinator::new(
            Arc::clone(&store),
            Arc::new(fetcher),
            Arc::clone(&audit),
            PublishLimits {
                max_parallel_fetches: config.fetch.max_parallel_fetches,
                publish_deadline_ms: config.fetch.publish_deadline_ms,
            },
        );
        let discovery = DiscoveryEngine::new(Arc::clone(&store));
        let identity = IdentityService::new(Arc::clone(&store), federated);
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());

        let state = Arc::new(AppState {
            coordinator,
            discovery,
            identity,
            rate_limiter,
            audit,
            request_counter: AtomicU64::new(0),
        });
        Ok(Self {
            bind,
            state,
        })
    }

    /// Returns the axum router for this server.
    #[must_use]
    pub fn router(&self, max_body_bytes: usize) -> Router {
        build_router(Arc::clone(&self.state), max_body_bytes)
    }

    /// Binds and serves requests until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when the listener fails.
    pub async fn serve(self, max_body_bytes: usize) -> Result<(), ServerError> {
        let app = build_router(self.state, max_body_bytes);
        let listener = tokio::net::TcpListener::bind(self.bind)
            .await
            .map_err(|err| ServerError::Transport(format!("bind failed: {err}")))?;
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|err| ServerError::Transport(format!("server failed: {err}")))
    }
}

/// Builds the configured store backend.
fn build_store(config: &RegistryConfig) -> Result<Arc<dyn RegistryStore>, ServerError> {
    match config.store.store_type {
        StoreType::Memory => Ok(Arc::new(InMemoryRegistryStore::new())),
        StoreType::Sqlite => {
            let path = config
                .store
                .path
                .clone()
                .ok_or_else(|| ServerError::Config("sqlite store requires path".to_string()))?;
            let store = SqliteRegistryStore::new(SqliteStoreConfig {
                path,
                busy_timeout_ms: config.store.busy_timeout_ms,
                journal_mode: config.store.journal_mode,
                sync_mode: config.store.sync_mode,
            })
            .map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Builds the configured audit sink.
fn build_audit_sink(config: &RegistryConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    if !config.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    if let Some(path) = &config.audit.path {
        let sink = FileAuditSink::new(std::path::Path::new(path))
            .map_err(|err| ServerError::Config(format!("audit log open failed: {err}")))?;
        return Ok(Arc::new(sink));
    }
    Ok(Arc::new(StderrAuditSink))
}

/// Builds the /v1 route table.
fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/packages", get(list_packages))
        .route("/v1/packages/{name}", get(get_package))
        .route("/v1/packages/{name}/versions", get(list_versions))
        .route("/v1/packages/{name}/{version}", get(get_version))
        .route("/v1/search", get(search))
        .route("/v1/index.json", get(index))
        .route("/v1/register", post(register))
        .route("/v1/packages/{name}/{version}/yank", delete(yank))
        .route("/v1/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

// ============================================================================
// SECTION: Error Envelope
// ============================================================================

/// Wire error response carrying the stable envelope.
struct ApiError {
    /// HTTP status.
    status: StatusCode,
    /// Stable error code.
    code: &'static str,
    /// Human-readable message.
    message: String,
    /// Structured details.
    details: Option<Value>,
    /// Extra response headers (rate limiting).
    headers: Vec<(&'static str, String)>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        let mut response = (self.status, axum::Json(body)).into_response();
        for (name, value) in self.headers {
            if let Ok(value) = value.parse() {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// Maps an error kind onto its HTTP status.
const fn status_for(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::InvalidVersion(_)
        | RegistryError::InvalidManifest { .. }
        | RegistryError::DigestMismatch { .. }
        | RegistryError::SizeMismatch { .. }
        | RegistryError::UrlNotHttps(_)
        | RegistryError::UrlUnreachable { .. }
        | RegistryError::UrlRedirectLimit(_)
        | RegistryError::FetchTimeout(_) => StatusCode::BAD_REQUEST,
        RegistryError::Unauthenticated(_)
        | RegistryError::TokenInvalid(_)
        | RegistryError::TokenExpired => StatusCode::UNAUTHORIZED,
        RegistryError::Forbidden { .. } | RegistryError::NameClaimed(_) => StatusCode::FORBIDDEN,
        RegistryError::PackageNotFound(_) | RegistryError::VersionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        RegistryError::VersionExists { .. } => StatusCode::CONFLICT,
        RegistryError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        RegistryError::InvalidFilename { .. }
        | RegistryError::NameMismatch { .. }
        | RegistryError::VersionMismatch { .. }
        | RegistryError::TagMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Converts a registry error into the wire envelope, logging internals.
fn api_error(state: &AppState, request_id: &str, error: &RegistryError) -> ApiError {
    let status = status_for(error);
    let (message, details) = if matches!(error, RegistryError::Internal(_)) {
        state.audit.record(
            &RegistryAuditEvent::new("internal_error", request_id, "reject")
                .with_error_kind(error.kind())
                .with_reason(error.to_string()),
        );
        ("internal error".to_string(), Some(json!({ "request_id": request_id })))
    } else {
        (error.to_string(), error.details())
    };
    let headers = match error {
        RegistryError::RateLimited { limit, remaining, reset_epoch_seconds } => vec![
            ("x-ratelimit-limit", limit.to_string()),
            ("x-ratelimit-remaining", remaining.to_string()),
            ("x-ratelimit-reset", reset_epoch_seconds.to_string()),
            ("retry-after", reset_epoch_seconds.to_string()),
        ],
        _ => Vec::new(),
    };
    ApiError {
        status,
        code: error.kind(),
        message,
        details,
        headers,
    }
}

// ============================================================================
// SECTION: Request Pipeline
// ============================================================================

/// Operation classes for rate-limit cost.
#[derive(Debug, Clone, Copy)]
enum OperationClass {
    /// Read-only query.
    Read,
    /// Publish or yank.
    Write,
}

/// Allocates a correlation id for one request.
fn next_request_id(state: &AppState) -> String {
    let sequence = state.request_counter.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{sequence}", now_millis())
}

/// Derives the rate limit key for a request.
///
/// Authenticated callers are bucketed by credential fingerprint; anonymous
/// reads share a bucket per source address.
fn rate_limit_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    let auth_header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    if let Ok(token) = parse_bearer_token(auth_header) {
        return format!("token:{}", token_fingerprint(&token));
    }
    PrincipalId::anonymous(&peer.ip().to_string()).to_string()
}

/// Applies the rate limiter, mapping denials to wire errors.
fn check_rate(
    state: &AppState,
    headers: &HeaderMap,
    peer: SocketAddr,
    class: OperationClass,
    request_id: &str,
) -> Result<(), ApiError> {
    let cost = match class {
        OperationClass::Read => 1,
        OperationClass::Write => state.rate_limiter.publish_cost(),
    };
    match state.rate_limiter.check(&rate_limit_key(headers, peer), cost) {
        RateLimitDecision::Allow { .. } => Ok(()),
        RateLimitDecision::Limited { limit, remaining, reset_epoch_seconds } => {
            Err(api_error(state, request_id, &RegistryError::RateLimited {
                limit,
                remaining,
                reset_epoch_seconds,
            }))
        }
        RateLimitDecision::OverCapacity => Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "rate-limited",
            message: "rate limiter overloaded".to_string(),
            details: None,
            headers: Vec::new(),
        }),
    }
}

/// Authenticates a request, emitting an auth audit event.
async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<AuthenticatedPrincipal, ApiError> {
    let auth_header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    match state.identity.authenticate(auth_header).await {
        Ok(principal) => {
            state.audit.record(
                &RegistryAuditEvent::new("authn", request_id, "allow")
                    .with_principal(principal.principal.as_str()),
            );
            Ok(principal)
        }
        Err(err) => {
            let registry_error: RegistryError = err.into();
            state.audit.record(
                &RegistryAuditEvent::new("authn", request_id, "deny")
                    .with_error_kind(registry_error.kind())
                    .with_reason(registry_error.to_string()),
            );
            Err(api_error(state, request_id, &registry_error))
        }
    }
}

// ============================================================================
// SECTION: Query Parameters
// ============================================================================

/// Pagination parameters for package listings.
#[derive(Debug, Deserialize)]
struct ListParams {
    /// Page number (1-based).
    page: Option<usize>,
    /// Items per page.
    per_page: Option<usize>,
}

/// Parameters for the version listing.
#[derive(Debug, Deserialize)]
struct VersionListParams {
    /// Include yanked versions (default true).
    include_yanked: Option<bool>,
}

/// Optional yank request body.
#[derive(Debug, Default, Deserialize)]
struct YankBody {
    /// Reason recorded on the yanked version.
    #[serde(default)]
    reason: String,
}

/// Publish acknowledgment envelope.
#[derive(Debug, Serialize)]
struct MessageResponse {
    /// Human-readable confirmation.
    message: String,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// GET /v1/packages
async fn list_packages(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Read, &request_id)?;
    let response = state
        .discovery
        .list_packages(params.page, params.per_page)
        .map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(response).into_response())
}

/// GET /v1/packages/{name}
async fn get_package(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Read, &request_id)?;
    let response = state
        .discovery
        .get_package(&PackageName::new(name))
        .map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(response).into_response())
}

/// GET /v1/packages/{name}/versions
async fn list_versions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(params): Query<VersionListParams>,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Read, &request_id)?;
    let response = state
        .discovery
        .list_versions(&PackageName::new(name), params.include_yanked.unwrap_or(true))
        .map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(response).into_response())
}

/// GET /v1/packages/{name}/{version}
async fn get_version(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((name, version)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Read, &request_id)?;
    let version = Version::parse(&version)
        .map_err(|err| api_error(&state, &request_id, &err.into()))?;
    let response = state
        .discovery
        .get_version(&PackageName::new(name), &version)
        .map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(response).into_response())
}

/// GET /v1/search
async fn search(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Read, &request_id)?;
    let response =
        state.discovery.search(&query).map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(response).into_response())
}

/// GET /v1/index.json
async fn index(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Read, &request_id)?;
    let response =
        state.discovery.index().map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(response).into_response())
}

/// POST /v1/register
async fn register(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Write, &request_id)?;
    let principal = authenticate(&state, &headers, &request_id).await?;
    let request: RegistrationRequest = serde_json::from_slice(&body).map_err(|err| {
        api_error(&state, &request_id, &RegistryError::InvalidManifest {
            details: vec![island_registry_core::ManifestFieldError::new(
                "body",
                format!("invalid json: {err}"),
            )],
        })
    })?;
    let outcome = state
        .coordinator
        .publish(&principal, request, &request_id)
        .await
        .map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(outcome).into_response())
}

/// DELETE /v1/packages/{name}/{version}/yank
async fn yank(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((name, version)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = next_request_id(&state);
    check_rate(&state, &headers, peer, OperationClass::Write, &request_id)?;
    let principal = authenticate(&state, &headers, &request_id).await?;
    let version = Version::parse(&version)
        .map_err(|err| api_error(&state, &request_id, &err.into()))?;
    let yank_body: YankBody = if body.is_empty() {
        YankBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            api_error(&state, &request_id, &RegistryError::InvalidManifest {
                details: vec![island_registry_core::ManifestFieldError::new(
                    "body",
                    format!("invalid json: {err}"),
                )],
            })
        })?
    };
    let name = PackageName::new(name);
    state
        .coordinator
        .yank(&principal, &name, &version, &yank_body.reason, &request_id)
        .map_err(|err| api_error(&state, &request_id, &err))?;
    Ok(axum::Json(MessageResponse {
        message: format!("yanked {name} {version}"),
    })
    .into_response())
}

/// GET /v1/health
async fn health() -> Response {
    axum::Json(json!({ "status": "ok" })).into_response()
}
