//! HTTP routes for the analytics pipeline
//!
//! Request and response bodies are camelCase JSON. Store work runs on the
//! blocking pool so a slow query never stalls the async runtime.

use crate::error::{ApiError, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use fanpulse_core::analytics::MetricsService;
use fanpulse_core::ingest::EventInput;
use fanpulse_core::{
    Artist, ContentItem, ContentMetricsPatch, ContentType, Database, EventIngest, NewSearchQuery,
    OrderRecord, SessionTracker, SessionUpdate, SubscriptionRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub ingest: EventIngest,
    pub sessions: SessionTracker,
    pub metrics: MetricsService,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: &fanpulse_core::Config) -> Self {
        Self {
            ingest: EventIngest::new(db.clone()),
            sessions: SessionTracker::new(db.clone()),
            metrics: MetricsService::new(db.clone(), config.analytics.clone()),
            db,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analytics", post(record_event))
        .route("/api/analytics/users/{user_id}", get(user_metrics))
        .route("/api/analytics/artists/{artist_id}", get(artist_metrics))
        .route("/api/analytics/platform", get(platform_metrics))
        .route("/api/analytics/search", post(record_search))
        .route("/api/analytics/sessions", post(start_session))
        .route(
            "/api/analytics/sessions/{id}",
            patch(update_session).delete(end_session),
        )
        .route("/api/analytics/subscriptions", post(record_subscription))
        .route("/api/analytics/orders", post(record_order))
        .route(
            "/api/analytics/content/{content_id}/{content_type}",
            get(content_performance).patch(upsert_content_performance),
        )
        .route("/api/analytics/catalog/artists/{artist_id}", put(upsert_artist))
        .route("/api/analytics/catalog/content/{content_id}", put(upsert_content))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================
// Metrics
// ============================================

#[derive(Debug, Deserialize)]
struct WindowQuery {
    days: Option<u32>,
}

async fn user_metrics(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: std::result::Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let days = state.metrics.config().window_days(query.days);
    let metrics = state.metrics.clone();
    let id = user_id.clone();

    match blocking(move || metrics.user_metrics(&id, days)).await? {
        Some(m) => Ok(Json(m).into_response()),
        None => Err(ApiError::not_found("user", &user_id)),
    }
}

async fn artist_metrics(
    State(state): State<AppState>,
    Path(artist_id): Path<String>,
    query: std::result::Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let days = state.metrics.config().window_days(query.days);
    let metrics = state.metrics.clone();
    let id = artist_id.clone();

    match blocking(move || metrics.artist_metrics(&id, days)).await? {
        Some(m) => Ok(Json(m).into_response()),
        None => Err(ApiError::not_found("artist", &artist_id)),
    }
}

async fn platform_metrics(
    State(state): State<AppState>,
    query: std::result::Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let days = state.metrics.config().window_days(query.days);
    let metrics = state.metrics.clone();

    let m = blocking(move || metrics.platform_metrics(days)).await?;
    Ok(Json(m).into_response())
}

// ============================================
// Ingest
// ============================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

impl Accepted {
    fn from_id(id: Option<i64>) -> Response {
        let body = Accepted {
            recorded: id.is_some(),
            id,
        };
        (StatusCode::ACCEPTED, Json(body)).into_response()
    }

    fn from_flag(recorded: bool) -> Response {
        (StatusCode::ACCEPTED, Json(Accepted { recorded, id: None })).into_response()
    }
}

async fn record_event(
    State(state): State<AppState>,
    body: std::result::Result<Json<EventInput>, JsonRejection>,
) -> Result<Response> {
    let Json(input) = body?;
    let event = input.into_event()?;
    let ingest = state.ingest.clone();

    let outcome = blocking(move || ingest.track_event(&event)).await?;
    Ok(Accepted::from_flag(outcome.is_recorded()))
}

async fn record_search(
    State(state): State<AppState>,
    body: std::result::Result<Json<NewSearchQuery>, JsonRejection>,
) -> Result<Response> {
    let Json(query) = body?;
    let ingest = state.ingest.clone();

    let id = blocking(move || ingest.record_search(&query)).await?;
    Ok(Accepted::from_id(id))
}

async fn record_subscription(
    State(state): State<AppState>,
    body: std::result::Result<Json<SubscriptionRecord>, JsonRejection>,
) -> Result<Response> {
    let Json(record) = body?;
    let ingest = state.ingest.clone();

    let id = blocking(move || ingest.record_subscription(&record)).await?;
    Ok(Accepted::from_id(id))
}

async fn record_order(
    State(state): State<AppState>,
    body: std::result::Result<Json<OrderRecord>, JsonRejection>,
) -> Result<Response> {
    let Json(order) = body?;
    let ingest = state.ingest.clone();

    let stored = blocking(move || ingest.record_order(&order)).await?;
    Ok(Accepted::from_flag(stored.is_some()))
}

// ============================================
// Sessions
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSession {
    user_id: String,
    #[serde(default)]
    device_info: Option<Value>,
    #[serde(default)]
    location: Option<Value>,
}

async fn start_session(
    State(state): State<AppState>,
    body: std::result::Result<Json<StartSession>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let sessions = state.sessions.clone();

    let id = blocking(move || sessions.start(&req.user_id, req.device_info, req.location))
        .await?
        .ok_or_else(|| ApiError::internal("session could not be started"))?;

    Ok((StatusCode::CREATED, Json(json!({ "sessionId": id }))).into_response())
}

async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<SessionUpdate>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(update) = body?;
    let sessions = state.sessions.clone();

    blocking(move || sessions.update(&id, &update)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn end_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    let sessions = state.sessions.clone();

    blocking(move || sessions.end(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Content performance
// ============================================

fn parse_content_type(raw: &str) -> Result<ContentType> {
    raw.parse().map_err(ApiError::BadRequest)
}

async fn content_performance(
    State(state): State<AppState>,
    Path((content_id, content_type)): Path<(String, String)>,
) -> Result<Response> {
    let content_type = parse_content_type(&content_type)?;
    let metrics = state.metrics.clone();
    let id = content_id.clone();

    match blocking(move || metrics.content_performance(&id, content_type)).await? {
        Some(perf) => Ok(Json(perf).into_response()),
        None => Err(ApiError::not_found("content", &content_id)),
    }
}

async fn upsert_content_performance(
    State(state): State<AppState>,
    Path((content_id, content_type)): Path<(String, String)>,
    body: std::result::Result<Json<ContentMetricsPatch>, JsonRejection>,
) -> Result<Response> {
    let content_type = parse_content_type(&content_type)?;
    let Json(patch) = body?;
    let ingest = state.ingest.clone();

    let perf = blocking(move || ingest.upsert_content_performance(&content_id, content_type, patch))
        .await?
        .ok_or_else(|| ApiError::internal("content performance could not be stored"))?;
    Ok(Json(perf).into_response())
}

// ============================================
// Catalog mirror
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtistProfile {
    name: String,
    #[serde(default)]
    follower_count: Option<i64>,
}

/// Mirror an artist profile from the catalog owner. Projected play and like
/// totals survive; followers are replaced only when the body carries them.
async fn upsert_artist(
    State(state): State<AppState>,
    Path(artist_id): Path<String>,
    body: std::result::Result<Json<ArtistProfile>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(profile) = body?;
    let db = state.db.clone();

    blocking(move || -> fanpulse_core::Result<()> {
        let mut artist = db
            .get_artist(&artist_id)?
            .unwrap_or_else(|| Artist::new(&artist_id, ""));
        artist.name = profile.name;
        if let Some(followers) = profile.follower_count {
            artist.follower_count = followers.max(0);
        }
        db.upsert_artist(&artist)
    })
    .await??;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogContent {
    artist_id: String,
    content_type: ContentType,
    title: String,
    #[serde(default)]
    genre: Option<String>,
}

/// Mirror a catalog item. Projected counters survive a re-sync.
async fn upsert_content(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    body: std::result::Result<Json<CatalogContent>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(content) = body?;
    let db = state.db.clone();
    let item = ContentItem {
        id: content_id,
        artist_id: content.artist_id,
        content_type: content.content_type,
        title: content.title,
        genre: content.genre,
        plays: 0,
        likes: 0,
        created_at: chrono::Utc::now(),
    };

    blocking(move || db.upsert_content(&item)).await??;
    Ok(StatusCode::NO_CONTENT)
}
