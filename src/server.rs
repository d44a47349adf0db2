//! HTTP surface: `GET /customsearch/v1` plus a few operational endpoints.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::orchestrator::Orchestrator;
use crate::response::CanonicalResponse;
use crate::{Result, SafeSearch, SearchError, SearchQuery};

/// Credential used when a request carries neither a key nor a forwarding header.
pub const ANONYMOUS: &str = "anonymous";

/// Header naming where a served response came from.
pub const SOURCE_HEADER: &str = "x-cse-source";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: Arc<ServiceConfig>) -> Self {
        Self { orchestrator, config }
    }
}

/// Builds the router with tracing and CORS layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/cache/clear", post(clear_cache))
        .route("/customsearch/v1", get(search))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Query string of the search endpoint. Numbers arrive as text so a bad
/// value yields a Google-style 400 instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    q: Option<String>,
    key: Option<String>,
    num: Option<String>,
    start: Option<String>,
    cx: Option<String>,
    lr: Option<String>,
    safe: Option<String>,
    date_restrict: Option<String>,
}

impl SearchParams {
    fn into_query(self) -> std::result::Result<SearchQuery, ApiError> {
        let text = self
            .q
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ApiError::invalid_argument("Missing required parameter: q"))?;

        let mut query = SearchQuery::new(text);
        if let Some(num) = self.num {
            query = query.with_num(parse_number("num", &num)?);
        }
        if let Some(start) = self.start {
            query = query.with_start(parse_number("start", &start)?);
        }
        if let Some(lr) = self.lr {
            query = query.with_language(lr);
        }
        if let Some(safe) = self.safe {
            query = query.with_safe(SafeSearch::parse(&safe));
        }
        if let Some(date_restrict) = self.date_restrict {
            query = query.with_date_restrict(date_restrict);
        }
        if let Some(cx) = self.cx {
            query = query.with_cx(cx);
        }
        Ok(query)
    }
}

fn parse_number(name: &str, raw: &str) -> std::result::Result<u32, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::invalid_argument(format!("Invalid value for {name}: '{raw}'")))
}

/// Rate-limit identity: the API key, else the first forwarded address.
fn credential(key: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) {
        return key.to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// Google-style error body.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    label: &'static str,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    fn new(status: StatusCode, label: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            label,
            message: message.into(),
            retry_after: None,
        }
    }

    fn unauthenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            "API key not valid. Please pass a valid API key.",
        )
    }

    fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
    }

    fn body(&self) -> Value {
        json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
                "status": self.label,
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body())).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    if !state.config.auth.accepts(params.key.as_deref()) {
        return ApiError::unauthenticated().into_response();
    }

    let credential = credential(params.key.as_deref(), &headers);
    let query = match params.into_query() {
        Ok(query) => query,
        Err(e) => return e.into_response(),
    };

    let started = tokio::time::Instant::now();
    match state.orchestrator.search(&credential, query.clone()).await {
        Ok(served) => {
            let mut response = Json(served.response.as_ref()).into_response();
            response.headers_mut().insert(
                SOURCE_HEADER,
                HeaderValue::from_static(served.source.as_str()),
            );
            response
        }
        Err(SearchError::QuotaExceeded { retry_after }) => ApiError {
            retry_after: Some(retry_after),
            ..ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RESOURCE_EXHAUSTED",
                format!(
                    "Quota exceeded for quota metric 'Queries'. Retry after {}s.",
                    retry_after.as_secs().max(1)
                ),
            )
        }
        .into_response(),
        Err(SearchError::InvalidQuery(message)) => ApiError::invalid_argument(message).into_response(),
        Err(e @ SearchError::BothProvidersFailed { .. }) => {
            error!("Search failed: {}", e);
            let echoed = query
                .clone()
                .normalize(&state.orchestrator.limits())
                .unwrap_or(query);
            unavailable(&echoed, started.elapsed(), &e)
        }
        Err(e) => {
            error!("Search failed: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string()).into_response()
        }
    }
}

/// 503 carrying the canonical shape with no items, plus the error object.
fn unavailable(query: &SearchQuery, elapsed: Duration, cause: &SearchError) -> Response {
    let error = ApiError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "UNAVAILABLE",
        cause.to_string(),
    );
    let mut body = serde_json::to_value(CanonicalResponse::empty(query, elapsed))
        .unwrap_or_else(|_| json!({ "items": [] }));
    if let (Some(map), Value::Object(extra)) = (body.as_object_mut(), error.body()) {
        map.extend(extra);
    }
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "search": "GET /customsearch/v1?q=<query>&key=<key>&num=<1-10>&start=<1-91>",
            "health": "GET /health",
            "stats": "GET /stats",
            "clear_cache": "POST /cache/clear",
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `key` of the operational endpoints.
#[derive(Debug, Default, Deserialize)]
struct KeyParam {
    key: Option<String>,
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<KeyParam>,
) -> std::result::Result<Json<Value>, ApiError> {
    if !state.config.auth.accepts(params.key.as_deref()) {
        return Err(ApiError::unauthenticated());
    }
    let cache = state.orchestrator.cache().stats().await;
    let limits = state.orchestrator.limits();
    let rate_limit = &state.config.rate_limit;
    Ok(Json(json!({
        "cache": cache,
        "rate_limit": {
            "enabled": rate_limit.enabled,
            "quota": rate_limit.quota,
            "window_secs": rate_limit.window_secs,
            "mode": rate_limit.mode,
        },
        "limits": {
            "max_results": limits.max_results,
            "max_start": limits.max_start,
        },
        "inflight": state.orchestrator.inflight(),
    })))
}

async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<KeyParam>,
) -> std::result::Result<Json<Value>, ApiError> {
    if !state.config.auth.accepts(params.key.as_deref()) {
        return Err(ApiError::unauthenticated());
    }
    let cleared = state.orchestrator.cache().clear().await;
    info!("Cleared {} cache entries", cleared);
    Ok(Json(json!({ "cleared": cleared })))
}
