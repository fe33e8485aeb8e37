//! HTTP server for mergemux
//!
//! JSON API for categories, scans and job submission, a Server-Sent Events
//! stream carrying job logs, and an optional static UI directory.

use crate::daemon::{AudioTrackRequest, Daemon, RemuxMode, RemuxRequest, SubmitError};
use crate::events::BusEvent;
use crate::qbit::{list_categories, SourceError};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server stopped: {0}")]
    Serve(std::io::Error),
}

/// Error body `{ "error": message }` with a status code.
struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    fn bad_request(message: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Unavailable(_) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: "qBittorrent unavailable",
            },
            SourceError::BadResponse(_) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: "qBittorrent response invalid",
            },
            SourceError::UnknownCategory(_) => Self {
                status: StatusCode::NOT_FOUND,
                message: "Unknown category",
            },
        }
    }
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string(), "kind": self.kind() })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemuxBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    /// Anything but a finite number is ignored, not rejected.
    #[serde(default)]
    threads: Option<Value>,
    #[serde(default)]
    audio_tracks: Vec<AudioTrackRequest>,
}

impl RemuxBody {
    fn into_request(self) -> RemuxRequest {
        let mode = match self.mode.as_deref() {
            Some("all") => RemuxMode::All,
            _ => RemuxMode::Single,
        };
        let threads = self
            .threads
            .as_ref()
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(1.0, 16.0) as u32);
        RemuxRequest {
            category: self.category.unwrap_or_default(),
            id: self.id.unwrap_or_default(),
            mode,
            threads,
            audio_tracks: self.audio_tracks,
        }
    }
}

/// Bodies are parsed regardless of content type.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Rejected request body");
        ApiError::bad_request("Invalid JSON")
    })
}

fn require_category(query: CategoryQuery) -> Result<String, ApiError> {
    query
        .category
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing category"))
}

fn started(job_id: String, channel: String) -> Response {
    Json(json!({ "status": "started", "jobId": job_id, "channel": channel })).into_response()
}

async fn get_categories(State(daemon): State<Arc<Daemon>>) -> Result<Response, ApiError> {
    let categories = list_categories(daemon.store().source())
        .await
        .map_err(|e| {
            warn!(error = %e, "qBittorrent categories fetch failed");
            ApiError {
                status: StatusCode::BAD_GATEWAY,
                message: "qBittorrent unavailable",
            }
        })?;
    Ok(Json(json!({ "categories": categories })).into_response())
}

async fn get_media(
    State(daemon): State<Arc<Daemon>>,
    Query(query): Query<CategoryQuery>,
) -> Result<Response, ApiError> {
    let category = require_category(query)?;
    let snapshot = daemon.store().scan(&category).await?;
    Ok(Json(&snapshot.merge).into_response())
}

async fn get_remux(
    State(daemon): State<Arc<Daemon>>,
    Query(query): Query<CategoryQuery>,
) -> Result<Response, ApiError> {
    let category = require_category(query)?;
    let snapshot = daemon.store().scan(&category).await?;
    Ok(Json(&snapshot.remux).into_response())
}

async fn post_merge(State(daemon): State<Arc<Daemon>>, body: Bytes) -> Response {
    let body: MergeBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    let category = body.category.unwrap_or_default();
    let id = body.id.unwrap_or_default();
    match daemon.submit_merge(&category, &id) {
        Ok(ticket) => started(ticket.job_id, ticket.channel),
        Err(e) => e.into_response(),
    }
}

async fn post_remux(State(daemon): State<Arc<Daemon>>, body: Bytes) -> Response {
    let body: RemuxBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    match daemon.submit_remux(body.into_request()) {
        Ok(ticket) => started(ticket.job_id, ticket.channel),
        Err(e) => e.into_response(),
    }
}

/// One SSE frame per bus event. JSON encoding keeps embedded newlines out
/// of the frame.
fn to_sse(event: BusEvent) -> Result<Event, axum::Error> {
    let frame = Event::default().event(event.kind());
    match &event {
        BusEvent::Log(log) => frame.json_data(log),
    }
}

async fn events(
    State(daemon): State<Arc<Daemon>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = daemon.bus().subscribe().map(to_sse);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Creates the axum Router with every API route
pub fn create_router(daemon: Arc<Daemon>) -> Router {
    let static_dir = daemon.config.server.static_dir.clone();
    let api = Router::new()
        .route("/api/categories", get(get_categories))
        .route("/api/media", get(get_media))
        .route("/api/remux", get(get_remux).post(post_remux))
        .route("/api/merge", post(post_merge))
        .route("/events", get(events))
        .with_state(daemon);

    // Unknown paths get index.html so client-side routes survive a reload.
    match static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            api.fallback_service(ServeDir::new(&dir).fallback(index))
        }
        None => api,
    }
}

/// Runs the HTTP server on the configured bind address and port
pub async fn run_server(daemon: Arc<Daemon>) -> Result<(), ServerError> {
    let addr = format!("{}:{}", daemon.config.server.bind, daemon.config.server.port);
    let app = create_router(daemon);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, "Server listening");
    axum::serve(listener, app).await.map_err(ServerError::Serve)
}
