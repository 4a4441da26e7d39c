// SPDX-License-Identifier: MIT OR Apache-2.0
//! Read-only HTTP inspection surface.
//!
//! The gateway's state is observable but not mutable over HTTP: health,
//! hosted spaces, paginated envelope history, participant tables, and
//! stream topology.

use crate::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use mew_core::stream::StreamInfo;
use mew_core::system::ParticipantInfo;
use mew_core::{Envelope, PROTOCOL_VERSION};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Default page size for `GET …/history`.
const DEFAULT_HISTORY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured API error returned on failure.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// 404 — resource not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let spaces = state.registry.names().await;
    Json(json!({
        "status": "ok",
        "protocol": PROTOCOL_VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "spaces_count": spaces.len(),
    }))
}

/// `GET /spaces` — names of all hosted spaces.
pub async fn list_spaces(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry.names().await)
}

/// Pagination for `GET …/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Return entries strictly older than this envelope ID.
    pub before: Option<String>,
    /// Maximum entries to return.
    pub limit: Option<usize>,
}

/// `GET /spaces/{space}/history` — reverse-chronological envelope history.
pub async fn history(
    Path(space_name): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Envelope>>, ApiError> {
    let space = state
        .registry
        .get(&space_name)
        .await
        .ok_or_else(|| ApiError::not_found("unknown space"))?;
    let guard = space.lock().await;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(guard.history.page(query.before.as_deref(), limit)))
}

/// `GET /spaces/{space}/participants`.
pub async fn participants(
    Path(space_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ParticipantInfo>>, ApiError> {
    let space = state
        .registry
        .get(&space_name)
        .await
        .ok_or_else(|| ApiError::not_found("unknown space"))?;
    let guard = space.lock().await;
    Ok(Json(guard.participant_infos()))
}

/// `GET /spaces/{space}/streams`.
pub async fn streams(
    Path(space_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StreamInfo>>, ApiError> {
    let space = state
        .registry
        .get(&space_name)
        .await
        .ok_or_else(|| ApiError::not_found("unknown space"))?;
    let guard = space.lock().await;
    Ok(Json(guard.stream_infos()))
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Log method, path, status, and duration for every request.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    resp
}
