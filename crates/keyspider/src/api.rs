//! The daemon's HTTP surface: inventory reads, live event streaming, graph
//! exports, and scan-job submission.

use crate::exporter::{self, Format};
use crate::hub::Hub;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{self, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use keyspider_sql::{access_events, concerns, edges, hosts, keys, scan_jobs};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

const HOSTS_LIMIT: i64 = 200;
const EVENTS_LIMIT: i64 = 500;
const EDGES_LIMIT: i64 = 1000;
const KEYS_LIMIT: i64 = 500;
const CONCERNS_LIMIT: i64 = 500;
const SSE_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub hub: Arc<Hub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/hosts", get(list_hosts))
        .route("/events", get(list_events))
        .route("/edges", get(list_edges))
        .route("/keys", get(list_keys))
        .route("/concerns", get(list_concerns))
        .route("/events/stream", get(stream_events))
        .route("/export/graph", get(export_graph))
        .route("/scans", post(enqueue_scan))
        .route("/scans/:id", get(get_scan))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Internal failures map to a plain 500 with the error text.
struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %format!("{:#}", self.0), "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_hosts(
    State(state): State<AppState>,
) -> Result<Json<Vec<hosts::Host>>, ApiError> {
    Ok(Json(hosts::list(HOSTS_LIMIT, &state.pool).await?))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    host_id: i64,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<access_events::AccessEvent>>, ApiError> {
    Ok(Json(
        access_events::list_for_host(query.host_id, EVENTS_LIMIT, &state.pool).await?,
    ))
}

async fn list_edges(
    State(state): State<AppState>,
) -> Result<Json<Vec<edges::Edge>>, ApiError> {
    Ok(Json(edges::list(EDGES_LIMIT, &state.pool).await?))
}

async fn list_keys(
    State(state): State<AppState>,
) -> Result<Json<Vec<keys::SshKey>>, ApiError> {
    Ok(Json(keys::list(KEYS_LIMIT, &state.pool).await?))
}

async fn list_concerns(
    State(state): State<AppState>,
) -> Result<Json<Vec<concerns::Concern>>, ApiError> {
    Ok(Json(concerns::list(CONCERNS_LIMIT, &state.pool).await?))
}

/// Live access events as server-sent events, one JSON payload per message.
/// Slow readers lose events rather than backing up the watcher.
async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let (_id, rx) = state.hub.subscribe(SSE_BUFFER);
    let stream = ReceiverStream::new(rx).map(|payload| {
        Ok(sse::Event::default().data(String::from_utf8_lossy(&payload).into_owned()))
    });
    Sse::new(stream).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default = "default_export_format")]
    format: String,
    #[serde(default = "default_export_limit")]
    limit: i64,
}

fn default_export_format() -> String {
    "json".to_string()
}
fn default_export_limit() -> i64 {
    10_000
}

async fn export_graph(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let Some(format) = Format::parse(&query.format) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            format!("unknown format {:?} (use json|csv|graphml)", query.format),
        )
            .into_response());
    };
    let body = exporter::export_graph(format, query.limit, &state.pool).await?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    target_host: String,
    #[serde(default)]
    since_seconds: Option<u64>,
    #[serde(default)]
    spider_depth: Option<i32>,
}

async fn enqueue_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = Duration::from_secs(request.since_seconds.unwrap_or(3600));
    let id = scan_jobs::enqueue(
        &request.target_host,
        since,
        request.spider_depth.unwrap_or(0),
        &state.pool,
    )
    .await?;
    tracing::info!(job_id = id, host = %request.target_host, "scan job enqueued");
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    match scan_jobs::fetch(id, &state.pool).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "no such scan job").into_response()),
    }
}
