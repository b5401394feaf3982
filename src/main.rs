mod agent;
mod bulk;
mod config;
mod context;
mod db;
mod ebay;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod metrics;
mod models;
mod reports;
mod security;
mod service;
#[cfg(test)]
mod test_support;
mod tools;
mod webhook;

use agent::AgentReply;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Extension, FromRef, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post, put},
};
use bulk::BulkPlan;
use config::AppConfig;
use context::AppContext;
use db::{AgentLogRow, TemplateRow, UserRow};
use ebay::MarketplaceListing;
use eyre::WrapErr;
use idempotency::{Claim, IdempotencyStore};
use jobs::{JobInfo, JobQueue};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AgentQueryRequest, ApiError, BulkOperationRequest, CategorySuggestion, CredentialUpdate,
    FromTemplateRequest, ListingChanges, ListingDraft, ListingStatus, RegisterUserRequest,
    ReportRequest, SearchCriteria, TemplateRequest,
};
use reports::{Dashboard, Report};
use security::{AuthContext, AuthState, require_api_auth};
use serde::Deserialize;
use serde_json::{Value, json};
use service::{ListingAnalysis, RelistOutcome, ServiceError, ServiceErrorKind, UpdateOutcome};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tools::Envelope;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "listing.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let ctx = Arc::new(
        AppContext::start(&config)
            .await
            .wrap_err("failed to open the listing store")?,
    );
    let (queue, worker) = JobQueue::spawn(
        ctx.listings.clone(),
        config.queue_capacity,
        Duration::from_secs(config.job_retention_secs),
    );
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install the prometheus recorder")?;

    let state = AppState {
        ctx: ctx.clone(),
        queue,
        idempotency: IdempotencyStore::from_config(
            config.redis_url.as_deref(),
            config.idempotency_ttl_secs,
        ),
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
        bulk_background_threshold: config.bulk_background_threshold,
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
    };
    if config.uses_default_api_keys() {
        warn!(
            target = "listing.api",
            "API_KEYS is unset or includes the demo credential; set API_KEYS before exposing this server"
        );
    }
    let auth = AuthState::new(&config.api_keys, ctx.store.clone());
    let app = build_router(state, auth, config.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "listing.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last queue sender, so the worker drains and exits.
    if let Err(err) = worker.await {
        error!(target = "listing.jobs", "bulk worker ended abnormally: {err}");
    }
    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(target = "listing.api", "shutdown requested");
    }
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    queue: JobQueue,
    idempotency: IdempotencyStore,
    openapi: Arc<Value>,
    prometheus_handle: PrometheusHandle,
    bulk_background_threshold: usize,
    heartbeat_interval: Duration,
}

impl FromRef<AppState> for Arc<AppContext> {
    fn from_ref(state: &AppState) -> Self {
        state.ctx.clone()
    }
}

fn load_openapi() -> Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

fn build_router(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/api/listings", post(create_listing).get(search_listings))
        .route(
            "/api/listings/{id}",
            get(get_listing).put(update_listing).delete(delete_listing),
        )
        .route("/api/listings/{id}/analyze", post(analyze_listing))
        .route("/api/listings/{id}/optimize", post(optimize_listing))
        .route("/api/listings/{id}/relist", post(relist_listing))
        .route("/api/bulk-operations", post(bulk_operations))
        .route("/api/bulk-operations/{task_id}", get(bulk_status))
        .route("/api/reports", post(generate_report))
        .route("/api/agent/query", post(query_agent))
        .route("/api/agent/logs", get(agent_logs))
        .route("/api/categories/suggest", get(suggest_categories))
        .route("/api/analytics/dashboard", get(dashboard))
        .route("/api/templates", get(list_templates).post(save_template))
        .route("/api/templates/{id}", delete(delete_template))
        .route("/api/templates/{id}/listings", post(create_from_template))
        .route("/api/users", post(register_user))
        .route("/api/users/me", get(current_profile))
        .route("/api/users/me/credential", put(update_credential))
        .nest("/mcp", webhook::router())
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/ws/updates", get(ws_updates))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

async fn current_user(state: &AppState, auth: &AuthContext) -> Result<UserRow, AppError> {
    Ok(state.ctx.listings.user(&auth.user_id).await?)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "eBay Listing Manager API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "api": "/docs",
            "mcp_webhook": "/mcp/webhook/mcp",
            "mcp_tools": "/mcp/webhook/tools"
        }
    }))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
///
/// `status` is `degraded` when the store does not answer.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = state.ctx.store.ping().await;
    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "service": "listing-manager-rs",
        "database": database,
    }))
}

async fn openapi_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    Json((*state.openapi).clone()).into_response()
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Listing Manager API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Heartbeat push channel: `{"type":"heartbeat","timestamp":...}` every interval.
async fn ws_updates(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let interval = state.heartbeat_interval;
    ws.on_upgrade(move |socket| heartbeat(socket, interval))
}

async fn heartbeat(mut socket: WebSocket, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let beat = json!({"type": "heartbeat", "timestamp": chrono::Utc::now()});
                if socket.send(Message::Text(beat.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Create a listing on the marketplace and record it locally.
///
/// - Method: `POST`
/// - Path: `/api/listings`
/// - Auth: `Authorization: Bearer <key>` or `X-Api-Key: <key>`
/// - Body: `ListingDraft`
/// - Response: the `create_listing` tool envelope
///
/// A repeated `Idempotency-Key` from the same user replays the first successful response;
/// a repeat that arrives while the first is still running gets `409 Conflict`.
async fn create_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(draft): Json<ListingDraft>,
) -> Result<Json<Envelope>, AppError> {
    crate::metrics::inc_requests("/api/listings");
    info!(
        target = "listing.api",
        user_id = %auth.user_id,
        email = %auth.email,
        api_key = %auth.api_key_id,
        "create listing"
    );
    let user = current_user(&state, &auth).await?;

    let replay_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|key| IdempotencyStore::key(&user.id, key));
    if let Some(key) = &replay_key {
        match state.idempotency.claim(key).await {
            Claim::Acquired => {}
            Claim::Replay(existing) => return Ok(Json(existing)),
            Claim::InFlight => return Err(AppError::DuplicateInFlight),
        }
    }

    let outcome = match state.ctx.listings.create_listing(&user, &draft).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(key) = &replay_key {
                state.idempotency.release(key).await;
            }
            return Err(err.into());
        }
    };
    let envelope = tools::created_envelope(outcome);
    if let Some(key) = &replay_key {
        state.idempotency.complete(key, &envelope).await;
    }
    Ok(Json(envelope))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    keyword: Option<String>,
    status: Option<ListingStatus>,
    category: Option<String>,
    date_from: Option<chrono::DateTime<chrono::Utc>>,
    date_to: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_page_size")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_page_size() -> usize {
    50
}

async fn search_listings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/api/listings:search");
    let user = current_user(&state, &auth).await?;
    let criteria = SearchCriteria {
        keyword: query.keyword,
        status: query.status,
        category: query.category,
        date_from: query.date_from,
        date_to: query.date_to,
    };
    let results = state.ctx.listings.search_listings(&user, &criteria).await?;
    let total = results.len();
    let page: Vec<_> = results
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();
    Ok(Json(json!({
        "total": total,
        "limit": query.limit,
        "offset": query.offset,
        "listings": page,
    })))
}

async fn get_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<MarketplaceListing>, AppError> {
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.get_listing(&user, &id).await?))
}

async fn update_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(changes): Json<ListingChanges>,
) -> Result<Json<UpdateOutcome>, AppError> {
    crate::metrics::inc_requests("/api/listings/{id}:update");
    let user = current_user(&state, &auth).await?;
    Ok(Json(
        state.ctx.listings.update_listing(&user, &id, &changes).await?,
    ))
}

async fn delete_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/api/listings/{id}:delete");
    let user = current_user(&state, &auth).await?;
    let outcome = state.ctx.listings.delete_listing(&user, &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Listing deleted",
        "removed_local": outcome.removed_local,
    })))
}

async fn analyze_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ListingAnalysis>, AppError> {
    crate::metrics::inc_requests("/api/listings/{id}/analyze");
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.analyze_listing(&user, &id).await?))
}

#[derive(Debug, Deserialize)]
struct OptimizeQuery {
    #[serde(default)]
    apply: bool,
}

/// Without `apply` only the suggestions come back; with it, `{optimizations, applied}`.
async fn optimize_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Query(query): Query<OptimizeQuery>,
) -> Result<Json<Value>, AppError> {
    crate::metrics::inc_requests("/api/listings/{id}/optimize");
    let user = current_user(&state, &auth).await?;
    let outcome = state
        .ctx
        .listings
        .optimize_listing(&user, &id, query.apply)
        .await?;
    let body = match outcome.applied {
        Some(applied) => json!({"optimizations": outcome.optimizations, "applied": applied}),
        None => json!(outcome.optimizations),
    };
    Ok(Json(body))
}

async fn relist_listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<RelistOutcome>, AppError> {
    crate::metrics::inc_requests("/api/listings/{id}/relist");
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.relist_listing(&user, &id).await?))
}

/// Batches above the background threshold are queued and answered with a `task_id`.
async fn bulk_operations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BulkOperationRequest>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/api/bulk-operations");
    let user = current_user(&state, &auth).await?;
    let plan = BulkPlan::from_request(request)?;

    if plan.len() > state.bulk_background_threshold {
        let task_id = state
            .queue
            .enqueue(user, plan)
            .await
            .map_err(|err| ServiceError::internal("bulk_operations", err.to_string()))?;
        let body = json!({
            "success": true,
            "message": "Bulk operation started in background",
            "task_id": task_id.to_string(),
        });
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let report = bulk::run(&state.ctx.listings, &user, &plan).await;
    Ok(Json(tools::bulk_envelope(report)).into_response())
}

async fn bulk_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    const OP: &str = "bulk_status";
    let id = uuid::Uuid::parse_str(&task_id)
        .map_err(|_| ServiceError::invalid_input(OP, "invalid task id"))?;
    state
        .queue
        .get(id, &auth.user_id)
        .await
        .map(Json)
        .ok_or_else(|| ServiceError::not_found(OP, format!("task {task_id} not found")).into())
}

async fn generate_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<Report>, AppError> {
    crate::metrics::inc_requests("/api/reports");
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.generate_report(&user, &request).await?))
}

async fn query_agent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<AgentQueryRequest>,
) -> Result<Json<AgentReply>, AppError> {
    crate::metrics::inc_requests("/api/agent/query");
    let user = current_user(&state, &auth).await?;
    let reply = state
        .ctx
        .agent
        .process(&user, &request.query, request.context.as_ref())
        .await
        .map_err(|err| err.into_service_error())?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: i64,
}

fn default_log_limit() -> i64 {
    20
}

async fn agent_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<AgentLogRow>>, AppError> {
    let user = current_user(&state, &auth).await?;
    Ok(Json(
        state.ctx.listings.recent_agent_logs(&user, query.limit).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    title: String,
    description: Option<String>,
}

async fn suggest_categories(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SuggestQuery>,
) -> Result<Json<Vec<CategorySuggestion>>, AppError> {
    crate::metrics::inc_requests("/api/categories/suggest");
    let user = current_user(&state, &auth).await?;
    Ok(Json(
        state
            .ctx
            .listings
            .suggest_categories(&user, &query.title, query.description.as_deref())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    #[serde(default = "default_dashboard_days")]
    days: i64,
}

fn default_dashboard_days() -> i64 {
    30
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Dashboard>, AppError> {
    crate::metrics::inc_requests("/api/analytics/dashboard");
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.dashboard(&user, query.days).await?))
}

async fn list_templates(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<TemplateRow>>, AppError> {
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.list_templates(&user).await?))
}

async fn save_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TemplateRequest>,
) -> Result<(StatusCode, Json<TemplateRow>), AppError> {
    let user = current_user(&state, &auth).await?;
    let saved = state.ctx.listings.save_template(&user, &request).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn delete_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = current_user(&state, &auth).await?;
    state.ctx.listings.delete_template(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The body is optional; when present its `overrides` are applied over the template.
async fn create_from_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    body: Option<Json<FromTemplateRequest>>,
) -> Result<Json<Envelope>, AppError> {
    crate::metrics::inc_requests("/api/templates/{id}/listings");
    let user = current_user(&state, &auth).await?;
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let outcome = state
        .ctx
        .listings
        .create_from_template(&user, &id, request.overrides.as_ref())
        .await?;
    Ok(Json(tools::created_envelope(outcome)))
}

async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserRow>), AppError> {
    let user = state.ctx.listings.register_user(&request.email).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn current_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Value>, AppError> {
    let user = current_user(&state, &auth).await?;
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "ebay_user_id": user.ebay_user_id,
        "has_credential": user.has_credential(),
        "created_at": user.created_at,
    })))
}

async fn update_credential(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(update): Json<CredentialUpdate>,
) -> Result<Json<UserRow>, AppError> {
    let user = current_user(&state, &auth).await?;
    Ok(Json(state.ctx.listings.update_credential(&user, &update).await?))
}

#[derive(Debug)]
enum AppError {
    Service(ServiceError),
    /// A request with the same `Idempotency-Key` is still being processed.
    DuplicateInFlight,
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Service(err) => {
                let status = match err.kind() {
                    ServiceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    ServiceErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ServiceErrorKind::Marketplace
                    | ServiceErrorKind::Storage
                    | ServiceErrorKind::Agent
                    | ServiceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(target = "listing.api", operation = err.operation(), "{err}");
                }
                let payload = ApiError {
                    error: err.operation().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::DuplicateInFlight => {
                let payload = ApiError {
                    error: "create_listing".to_string(),
                    detail: Some("a request with this Idempotency-Key is in progress".to_string()),
                };
                (StatusCode::CONFLICT, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::MarketplaceApi;
    use crate::test_support::{MockMarketplace, test_context};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    async fn app_with(marketplace: Arc<dyn MarketplaceApi>) -> (Router, Arc<AppContext>, UserRow) {
        let (ctx, _) = test_context(marketplace).await;
        let ctx = Arc::new(ctx);
        let listings = ctx.listings.clone();
        let (queue, _worker) = JobQueue::spawn(listings, 8, Duration::from_secs(60));
        let state = AppState {
            ctx: ctx.clone(),
            queue,
            idempotency: IdempotencyStore::memory(Duration::from_secs(60)),
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            bulk_background_threshold: 2,
            heartbeat_interval: Duration::from_secs(30),
        };
        let auth = AuthState::new(&format!("api@example.com:{KEY}"), ctx.store.clone());
        let router = build_router(state, auth, 256 * 1024);
        let user = ctx.store.find_or_create_user("api@example.com").await.unwrap();
        (router, ctx, user)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
        extra: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Api-Key", KEY);
        for (name, value) in extra {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn camera() -> Value {
        json!({
            "title": "Vintage Camera",
            "description": "35mm rangefinder with leather case",
            "price": 49.99,
            "quantity": 1,
            "category_id": "625"
        })
    }

    #[tokio::test]
    async fn public_routes_need_no_key() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/listings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let (status, created) = send(&app, "POST", "/api/listings", Some(camera()), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["success"], json!(true));
        let id = created["listing_id"].as_str().unwrap().to_string();
        assert_eq!(created["listing"]["status"], "active");
        assert!(created["listing"]["listed_at"].is_string());

        let (status, fetched) = send(&app, "GET", &format!("/api/listings/{id}"), None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["title"], "Vintage Camera");
        assert_eq!(fetched["price"], json!(49.99));
        assert_eq!(fetched["quantity"], json!(1));
    }

    #[tokio::test]
    async fn idempotency_key_replays_creation() {
        let mock = Arc::new(MockMarketplace::new());
        let (app, _, _) = app_with(mock.clone()).await;
        let headers = [("Idempotency-Key", "req-7")];
        let (_, first) = send(&app, "POST", "/api/listings", Some(camera()), &headers).await;
        let (_, second) = send(&app, "POST", "/api/listings", Some(camera()), &headers).await;
        assert_eq!(first["listing_id"], second["listing_id"]);
        assert_eq!(mock.calls(), vec!["AddItem".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_duplicate_keys_create_once() {
        let mock = Arc::new(MockMarketplace::new());
        let (app, _, _) = app_with(mock.clone()).await;
        let headers = [("Idempotency-Key", "req-8")];
        let (first, second) = tokio::join!(
            send(&app, "POST", "/api/listings", Some(camera()), &headers),
            send(&app, "POST", "/api/listings", Some(camera()), &headers),
        );
        let statuses = [first.0, second.0];
        assert!(statuses.contains(&StatusCode::OK));
        assert!(
            statuses
                .iter()
                .all(|s| *s == StatusCode::OK || *s == StatusCode::CONFLICT)
        );
        assert_eq!(mock.calls(), vec!["AddItem".to_string()]);
    }

    #[tokio::test]
    async fn failed_creation_frees_the_idempotency_key() {
        let mock = Arc::new(MockMarketplace::new());
        let (app, _, _) = app_with(mock.clone()).await;
        let headers = [("Idempotency-Key", "req-9")];
        let mut invalid = camera();
        invalid["price"] = json!(-5);
        let (status, _) = send(&app, "POST", "/api/listings", Some(invalid), &headers).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "POST", "/api/listings", Some(camera()), &headers).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(mock.calls(), vec!["AddItem".to_string()]);
    }

    #[tokio::test]
    async fn invalid_draft_is_a_400() {
        let mock = Arc::new(MockMarketplace::new());
        let (app, _, _) = app_with(mock.clone()).await;
        let mut draft = camera();
        draft["price"] = json!(-5);
        let (status, body) = send(&app, "POST", "/api/listings", Some(draft), &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "create_listing");
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_listing_is_a_404() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let (status, _) = send(&app, "GET", "/api/listings/999", None, &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_is_paginated() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        for _ in 0..3 {
            send(&app, "POST", "/api/listings", Some(camera()), &[]).await;
        }
        let (status, body) = send(&app, "GET", "/api/listings?limit=2&offset=1", None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], json!(3));
        assert_eq!(body["listings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn large_bulk_batches_are_queued_and_pollable() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let request = json!({"operation": "relist", "listing_ids": ["a", "b", "c"]});
        let (status, body) = send(&app, "POST", "/api/bulk-operations", Some(request), &[]).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "Bulk operation started in background");
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let (status, info) =
            send(&app, "GET", &format!("/api/bulk-operations/{task_id}"), None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["task_id"], json!(task_id));

        let (status, _) = send(&app, "GET", "/api/bulk-operations/not-a-uuid", None, &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn small_bulk_batches_run_inline() {
        let mock = MockMarketplace::new();
        mock.seed("a", "Lens", 20.0, 1);
        let (app, _, _) = app_with(Arc::new(mock)).await;
        let request = json!({"operation": "update", "listing_ids": ["a"], "data": {"price": 18.0}});
        let (status, body) = send(&app, "POST", "/api/bulk-operations", Some(request), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Updated 1 of 1 listings");
        assert_eq!(body["successful"], json!(1));
    }

    #[tokio::test]
    async fn optimize_with_apply_reports_outcome() {
        let mock = MockMarketplace::new();
        mock.seed("110000000042", "Vintage Camera", 50.0, 1);
        let (app, _, _) = app_with(Arc::new(mock)).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/listings/110000000042/optimize?apply=true",
            None,
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], json!(true));
        assert_eq!(body["optimizations"]["pricing"]["suggested_price"], json!(49.99));

        let (_, plain) =
            send(&app, "POST", "/api/listings/110000000042/optimize", None, &[]).await;
        assert!(plain.get("applied").is_none());
        assert!(plain["keywords"].is_array());
    }

    #[tokio::test]
    async fn templates_create_listings() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let (status, template) = send(
            &app,
            "POST",
            "/api/templates",
            Some(json!({"name": "camera", "template": camera()})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = template["id"].as_str().unwrap().to_string();

        let (status, created) = send(
            &app,
            "POST",
            &format!("/api/templates/{id}/listings"),
            Some(json!({"overrides": {"price": 39.0}})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["listing"]["price"], json!(39.0));

        let (status, _) = send(&app, "DELETE", &format!("/api/templates/{id}"), None, &[]).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &format!("/api/templates/{id}"), None, &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_is_mounted_behind_auth() {
        let (app, ctx, user) = app_with(Arc::new(MockMarketplace::new())).await;
        let (status, body) = send(
            &app,
            "POST",
            "/mcp/webhook/mcp",
            Some(json!({"tool": "unknown", "arguments": {}})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Unknown tool: unknown");

        let logs = ctx.listings.recent_agent_logs(&user, 5).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn credential_update_hides_the_token() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let (status, body) = send(
            &app,
            "PUT",
            "/api/users/me/credential",
            Some(json!({"ebay_token": "v^1.1#abc", "ebay_user_id": "seller_1"})),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ebay_user_id"], "seller_1");
        assert!(body.get("ebay_token").is_none());

        let (_, profile) = send(&app, "GET", "/api/users/me", None, &[]).await;
        assert_eq!(profile["has_credential"], json!(true));
    }

    #[tokio::test]
    async fn users_register_once() {
        let (app, _, _) = app_with(Arc::new(MockMarketplace::new())).await;
        let body = json!({"email": "second@example.com"});
        let (status, user) = send(&app, "POST", "/api/users", Some(body.clone()), &[]).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["email"], "second@example.com");

        let (status, _) = send(&app, "POST", "/api/users", Some(body), &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
