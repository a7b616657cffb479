//! HTTP/JSON transport.
//!
//! Thin axum layer over [`QuoteService`] and [`HealthCheck`]. Handlers
//! validate query parameters, call one service operation and map the
//! result to JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service index |
//! | `GET`  | `/api/quotes` | Cached quotes; `tags` (comma-separated), `author`, `minLength`, `maxLength` |
//! | `GET`  | `/api/quotes/random` | Fresh upstream quote, or a ranked cached one |
//! | `GET`  | `/api/quotes/top-rated` | `limit` 1–100, default 10 |
//! | `GET`  | `/api/quotes/most-viewed` | `limit` 1–100, default 10 |
//! | `GET`  | `/api/quotes/stats` | Cache statistics |
//! | `GET`  | `/api/quotes/search` | Upstream search, cached; `query` required, `limit` 1–100 |
//! | `GET`  | `/api/quotes/by-author` | Upstream author lookup, cached; `author` required, `limit` 1–100 |
//! | `GET`  | `/api/quotes/{id}` | Cached quote by id |
//! | `POST` | `/api/quotes/{id}/like` | Like a quote |
//! | `GET`  | `/api/quotes/{id}/similar` | `limit` 1–50, default 5 |
//! | `GET`  | `/health` | Full health report |
//! | `GET`  | `/health/live` | Liveness |
//! | `GET`  | `/health/ready` | Readiness; 503 when unhealthy |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Quote not found: abc" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `no_quotes_available` (503), `upstream_unavailable` (503),
//! `upstream_timeout` (504), `upstream_error` (502), `internal` (500).
//! `/health/ready` answers `unavailable` (503) while the service is unhealthy.
//!
//! # CORS
//!
//! `server.allowed_origins = ["*"]` permits any origin; otherwise only the
//! listed origins are allowed.

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use quote_relay_core::models::{Quote, QuoteFilters, QuoteStatistics, DEFAULT_SIMILAR_LIMIT};
use quote_relay_core::ranking::RankingEngine;
use quote_relay_core::store::memory::InMemoryRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::{Config, ServerConfig};
use crate::error::{FetchError, ServiceError};
use crate::health::{HealthCheck, HealthReport};
use crate::service::{QuoteService, DEFAULT_TOP_LIMIT};
use crate::upstream::UpstreamClient;

const MAX_TOP_LIMIT: usize = 100;
const MAX_SIMILAR_LIMIT: usize = 50;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    service: QuoteService,
    health: Arc<HealthCheck>,
}

impl AppState {
    pub fn new(service: QuoteService, health: Arc<HealthCheck>) -> Self {
        Self { service, health }
    }
}

/// Wire everything from configuration: empty in-memory cache, resilient
/// upstream client, service and health checker.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let repository = Arc::new(InMemoryRepository::new());
    let upstream = Arc::new(UpstreamClient::from_config(config)?);

    let service = QuoteService::new(
        repository.clone(),
        upstream.clone(),
        RankingEngine::default(),
    );
    let health = HealthCheck::new(upstream, repository, config.server.environment);

    Ok(AppState::new(service, Arc::new(health)))
}

/// Build the router with all routes and the CORS layer.
pub fn router(state: AppState, server: &ServerConfig) -> anyhow::Result<Router> {
    let cors = cors_layer(&server.allowed_origins)?;

    Ok(Router::new()
        .route("/", get(handle_index))
        .route("/api/quotes", get(handle_list_quotes))
        .route("/api/quotes/random", get(handle_random_quote))
        .route("/api/quotes/top-rated", get(handle_top_rated))
        .route("/api/quotes/most-viewed", get(handle_most_viewed))
        .route("/api/quotes/stats", get(handle_statistics))
        .route("/api/quotes/search", get(handle_search_upstream))
        .route("/api/quotes/by-author", get(handle_by_author))
        .route("/api/quotes/{id}", get(handle_get_quote))
        .route("/api/quotes/{id}/like", post(handle_like_quote))
        .route("/api/quotes/{id}/similar", get(handle_similar_quotes))
        .route("/health", get(handle_health))
        .route("/health/live", get(handle_live))
        .route("/health/ready", get(handle_ready))
        .layer(cors)
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let parsed = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(parsed)))
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config)?;
    let app = router(state, &config.server)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        upstream = %config.upstream.base_url,
        environment = config.server.environment.as_str(),
        "quote-relay listening"
    );

    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(id: &str) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        ServiceError::NotFound(id.to_string()).to_string(),
    )
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            ServiceError::NoQuotesAvailable => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "no_quotes_available", message)
            }
            ServiceError::Fetch(FetchError::UpstreamUnavailable) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", message)
            }
            ServiceError::Fetch(FetchError::RequestTimeout) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", message)
            }
            ServiceError::Fetch(_) => AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message),
            ServiceError::Repository(e) => {
                tracing::error!(error = %e, "Repository failure");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
            }
        }
    }
}

// ============ Request / response shapes ============

/// Public projection of a cached quote.
#[derive(Debug, Serialize)]
struct QuoteResponse {
    id: String,
    content: String,
    author: String,
    tags: Vec<String>,
    length: u32,
    likes: u64,
    views: u64,
}

impl From<Quote> for QuoteResponse {
    fn from(q: Quote) -> Self {
        Self {
            id: q.id,
            content: q.content,
            author: q.author,
            tags: q.tags,
            length: q.length,
            likes: q.likes,
            views: q.views,
        }
    }
}

#[derive(Debug, Serialize)]
struct QuoteListResponse {
    quotes: Vec<QuoteResponse>,
    total: usize,
}

impl From<Vec<Quote>> for QuoteListResponse {
    fn from(quotes: Vec<Quote>) -> Self {
        let total = quotes.len();
        Self {
            quotes: quotes.into_iter().map(QuoteResponse::from).collect(),
            total,
        }
    }
}

#[derive(Debug, Serialize)]
struct LikeResponse {
    id: String,
    likes: u64,
    success: bool,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    query: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorQuery {
    author: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    tags: Option<String>,
    author: Option<String>,
    min_length: Option<String>,
    max_length: Option<String>,
}

/// Parse `limit`, falling back to `default` when absent or blank.
fn parse_limit(raw: Option<&str>, default: usize, max: usize) -> Result<usize, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    match raw.parse::<usize>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        _ => Err(bad_request(format!(
            "limit must be an integer between 1 and {}",
            max
        ))),
    }
}

fn required(name: &str, raw: Option<String>) -> Result<String, AppError> {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request(format!("{} is required", name)))
}

fn parse_length(name: &str, raw: Option<&str>) -> Result<Option<u32>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|_| bad_request(format!("{} must be a non-negative integer", name))),
    }
}

impl ListQuery {
    fn into_filters(self) -> Result<QuoteFilters, AppError> {
        let tags = self
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        let min_length = parse_length("minLength", self.min_length.as_deref())?;
        let max_length = parse_length("maxLength", self.max_length.as_deref())?;
        if let (Some(min), Some(max)) = (min_length, max_length) {
            if min > max {
                return Err(bad_request("minLength must not exceed maxLength"));
            }
        }

        Ok(QuoteFilters {
            tags,
            author: self
                .author
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            min_length,
            max_length,
        })
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct IndexResponse {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    endpoints: Vec<&'static str>,
}

async fn handle_index() -> Json<IndexResponse> {
    Json(IndexResponse {
        name: "quote-relay",
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
        endpoints: vec![
            "GET /api/quotes",
            "GET /api/quotes/random",
            "GET /api/quotes/top-rated",
            "GET /api/quotes/most-viewed",
            "GET /api/quotes/stats",
            "GET /api/quotes/search",
            "GET /api/quotes/by-author",
            "GET /api/quotes/{id}",
            "POST /api/quotes/{id}/like",
            "GET /api/quotes/{id}/similar",
            "GET /health",
            "GET /health/live",
            "GET /health/ready",
        ],
    })
}

// ============ /api/quotes ============

async fn handle_list_quotes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let filters = query.into_filters()?;
    let quotes = if filters.is_empty() {
        state.service.get_all_quotes(None)?
    } else {
        state.service.get_all_quotes(Some(&filters))?
    };
    Ok(Json(quotes.into()))
}

async fn handle_random_quote(
    State(state): State<AppState>,
) -> Result<Json<QuoteResponse>, AppError> {
    let quote = state.service.get_random_quote().await?;
    tracing::debug!(id = %quote.id, "Served random quote");
    Ok(Json(quote.into()))
}

async fn handle_top_rated(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_TOP_LIMIT, MAX_TOP_LIMIT)?;
    Ok(Json(state.service.get_top_rated_quotes(Some(limit))?.into()))
}

async fn handle_most_viewed(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_TOP_LIMIT, MAX_TOP_LIMIT)?;
    Ok(Json(state.service.get_most_viewed_quotes(Some(limit))?.into()))
}

async fn handle_statistics(
    State(state): State<AppState>,
) -> Result<Json<QuoteStatistics>, AppError> {
    Ok(Json(state.service.get_statistics()?))
}

async fn handle_search_upstream(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let query = required("query", params.query)?;
    let limit = parse_limit(params.limit.as_deref(), DEFAULT_TOP_LIMIT, MAX_TOP_LIMIT)?;
    Ok(Json(state.service.search_upstream(&query, limit).await?.into()))
}

async fn handle_by_author(
    State(state): State<AppState>,
    Query(params): Query<AuthorQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let author = required("author", params.author)?;
    let limit = parse_limit(params.limit.as_deref(), DEFAULT_TOP_LIMIT, MAX_TOP_LIMIT)?;
    Ok(Json(state.service.fetch_by_author(&author, limit).await?.into()))
}

async fn handle_get_quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QuoteResponse>, AppError> {
    match state.service.get_quote_by_id(&id)? {
        Some(quote) => Ok(Json(quote.into())),
        None => Err(not_found(&id)),
    }
}

async fn handle_like_quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LikeResponse>, AppError> {
    match state.service.like_quote(&id)? {
        Some(quote) => Ok(Json(LikeResponse {
            id: quote.id,
            likes: quote.likes,
            success: true,
        })),
        None => Err(not_found(&id)),
    }
}

async fn handle_similar_quotes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let limit = parse_limit(
        query.limit.as_deref(),
        DEFAULT_SIMILAR_LIMIT,
        MAX_SIMILAR_LIMIT,
    )?;
    let quotes = state.service.get_similar_quotes(&id, Some(limit)).await?;
    Ok(Json(quotes.into()))
}

// ============ /health ============

#[derive(Serialize)]
struct ProbeResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.check().await)
}

async fn handle_live() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

async fn handle_ready(State(state): State<AppState>) -> Result<Json<ProbeResponse>, AppError> {
    let report = state.health.check().await;
    if report.is_unhealthy() {
        return Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "Service unavailable",
        ));
    }
    Ok(Json(ProbeResponse {
        status: "ready",
        timestamp: Utc::now(),
    }))
}
