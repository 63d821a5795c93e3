//! HTTP/JSON API over the user store.
//!
//! - GET /v1/users (page, page_size, sort, order, q, fields, field filters)
//! - POST /v1/users, PUT /v1/users, DELETE /v1/users, DELETE /v1/users/{id}
//! - GET /v1/cache/stats, POST /v1/cache/invalidate
//! - GET /v1/events (SSE)
//! - GET /metrics, GET /health

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{BackendError, Created};
use crate::entity::EntityKey;
use crate::error::StoreError;
use crate::metrics;
use crate::models::User;
use crate::query::{Filter, QueryContext, SortDirection, SortSpec};
use crate::server::streaming::events_to_sse_stream;
use crate::store::{EntityStore, MutationOutcome, StoreStats};
use crate::view::PaginationView;

/// Application state shared across handlers.
pub struct AppState {
    pub users: EntityStore<User>,
    pub registry: Registry,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/v1/users",
            get(list_users)
                .post(create_users)
                .put(update_users)
                .delete(delete_users),
        )
        .route("/v1/users/{id}", delete(delete_user))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/invalidate", post(invalidate_cache))
        .route("/v1/events", get(events))
        .route("/metrics", get(metrics_text))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Query parameters with a fixed meaning; every other parameter is a filter.
const PAGE_PARAM: &str = "page";
const PAGE_SIZE_PARAM: &str = "page_size";
const SORT_PARAM: &str = "sort";
const ORDER_PARAM: &str = "order";

const DEFAULT_PAGE_SIZE: usize = 20;

/// Body of DELETE /v1/users.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<EntityKey>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub store: StoreStats,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub cleared_blocks: usize,
}

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::Backend(err)) => match err.as_ref() {
                BackendError::Rejected { code, .. } if code == "NOT_FOUND" => StatusCode::NOT_FOUND,
                BackendError::Rejected { code, .. } if code == "DUPLICATE_KEY" => StatusCode::CONFLICT,
                BackendError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                BackendError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                BackendError::Transport(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Store(StoreError::Unsupported { .. }) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Store(StoreError::MalformedResponse { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Store(StoreError::InvalidConfig { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Store(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Store(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "message": self.message(),
            "error": { "code": self.code() },
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Split raw query parameters into page, page size and query context.
pub fn parse_list_params(
    params: &HashMap<String, String>,
) -> Result<(usize, usize, QueryContext), ApiError> {
    let number = |key: &str, default: usize| -> Result<usize, ApiError> {
        match params.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("`{key}` must be a positive integer"))),
        }
    };
    let page = number(PAGE_PARAM, 1)?;
    let page_size = number(PAGE_SIZE_PARAM, DEFAULT_PAGE_SIZE)?;

    let sort = match params.get(SORT_PARAM) {
        None => None,
        Some(field) => {
            let direction = match params.get(ORDER_PARAM) {
                None => SortDirection::Asc,
                Some(raw) => raw.parse().map_err(ApiError::BadRequest)?,
            };
            Some(SortSpec {
                field: field.clone(),
                direction,
            })
        }
    };

    let filter: Filter = params
        .iter()
        .filter(|(k, _)| ![PAGE_PARAM, PAGE_SIZE_PARAM, SORT_PARAM, ORDER_PARAM].contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok((page, page_size, QueryContext::new(Some(filter), sort)))
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PaginationView<User>>, ApiError> {
    let request_id = Uuid::new_v4();
    let (page, page_size, query) = parse_list_params(&params)?;

    debug!(
        %request_id,
        page,
        page_size,
        signature = %query.signature(),
        "List users request"
    );

    let view = state.users.set_view(page, page_size, query).await?;
    Ok(Json(view))
}

async fn create_users(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Created<User>>,
) -> Result<(StatusCode, Json<MutationOutcome<User>>), ApiError> {
    let items = body.into_vec();
    info!(count = items.len(), "Create users request");
    let outcome = state.users.create(items).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn update_users(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Created<User>>,
) -> Result<Json<MutationOutcome<User>>, ApiError> {
    let items = body.into_vec();
    info!(count = items.len(), "Update users request");
    Ok(Json(state.users.update(items).await?))
}

async fn delete_users(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteRequest>,
) -> Result<Json<MutationOutcome<User>>, ApiError> {
    if body.ids.is_empty() {
        return Err(ApiError::BadRequest("`ids` must not be empty".to_string()));
    }
    info!(count = body.ids.len(), "Delete users request");
    Ok(Json(state.users.delete(body.ids).await?))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MutationOutcome<User>>, ApiError> {
    info!(id, "Delete user request");
    Ok(Json(state.users.delete(vec![EntityKey::Int(id)]).await?))
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<StoreStats> {
    Json(state.users.stats().await)
}

async fn invalidate_cache(State(state): State<Arc<AppState>>) -> Json<InvalidateResponse> {
    let cleared_blocks = state.users.invalidate().await;
    Json(InvalidateResponse { cleared_blocks })
}

async fn events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stream = events_to_sse_stream(state.users.subscribe());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&state.registry),
    )
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        store: state.users.stats().await,
    })
}
