//! API Routes

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::stream_store::StreamStatus;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(super::health_check))
        // Streams
        .route("/api/streams", get(list_streams))
        .route("/api/streams/:id", get(get_stream))
        .route("/api/streams/:id/start", post(start_stream))
        .route("/api/streams/:id/stop", post(stop_stream))
        // Live view
        .route("/api/live/:id", get(live_stream))
        .with_state(state)
}

/// List all configured streams
async fn list_streams(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let streams = state.store.list_streams().await?;
    Ok(Json(streams))
}

/// Get a single stream
async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let stream = state
        .store
        .get_stream(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Stream {} not found", id)))?;
    Ok(Json(stream))
}

/// Flip the desired status to active. The orchestrator picks the stream up
/// on its next reconciliation cycle; nothing is spawned inline.
async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ensure_exists(&state, id).await?;
    state.store.set_status(id, StreamStatus::Active).await?;

    tracing::info!(stream_id = %id, "Stream start requested");
    Ok(Json(json!({ "id": id, "status": StreamStatus::Active.as_str() })))
}

/// Flip the desired status to inactive. The running worker notices at its
/// next control check and winds itself down.
async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ensure_exists(&state, id).await?;
    state.store.set_status(id, StreamStatus::Inactive).await?;

    tracing::info!(stream_id = %id, "Stream stop requested");
    Ok(Json(json!({ "id": id, "status": StreamStatus::Inactive.as_str() })))
}

async fn ensure_exists(state: &AppState, id: Uuid) -> Result<()> {
    state
        .store
        .get_stream(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Stream {} not found", id)))?;
    Ok(())
}

/// Interval between published frames, ~25 fps
const FRAME_INTERVAL: Duration = Duration::from_millis(40);
/// Backoff while no frame is cached yet
const EMPTY_WAIT: Duration = Duration::from_millis(100);

/// MJPEG live view. Publishes whatever the worker last cached; a stream
/// with no cached frame yet produces no parts until one appears, so a
/// viewer can connect before the worker does.
async fn live_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    let cache = state.cache.clone();

    let body = futures::stream::unfold(cache, move |cache| async move {
        let chunk = match cache.get(id).await {
            Some(frame) => {
                let mut part =
                    Vec::with_capacity(frame.len() + 64);
                part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
                part.extend_from_slice(&frame);
                part.extend_from_slice(b"\r\n");
                Bytes::from(part)
            }
            None => {
                tokio::time::sleep(EMPTY_WAIT).await;
                Bytes::new()
            }
        };
        tokio::time::sleep(FRAME_INTERVAL).await;
        Some((Ok::<Bytes, Infallible>(chunk), cache))
    });

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        Body::from_stream(body),
    )
}
