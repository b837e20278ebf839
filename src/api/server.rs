use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::prelude::{Engine, BASE64_STANDARD};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::alerts::{AlertTable, UserId};
use crate::analytics::HazardLabel;
use crate::pipeline::{FrameMailbox, FrameTask, LatestResult, ResultCache};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub mailbox: Arc<FrameMailbox>,
    pub results: ResultCache,
    pub alerts: AlertTable,
    pub backend: &'static str,
}

impl AppState {
    pub fn new(
        mailbox: Arc<FrameMailbox>,
        results: ResultCache,
        alerts: AlertTable,
        backend: &'static str,
    ) -> Self {
        Self {
            mailbox,
            results,
            alerts,
            backend,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No image data")]
    MissingImage,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decode fail")]
    Undecodable,
    #[error("{0}")]
    NotFound(String),
    #[error("image decode: {0}")]
    Image(#[from] opencv::Error),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectFrameRequest {
    image: Option<String>,
    #[serde(default, alias = "userID")]
    user_id: Option<UserId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertStateResponse {
    user_id: UserId,
    window: Vec<HazardLabel>,
    last_trigger_ms_ago: Option<u64>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    users: usize,
    queued: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/detect-frame", post(detect_frame_handler))
        .route("/api/detect-frame", post(detect_frame_handler))
        .route("/api/detect_frame", post(detect_frame_handler))
        .route("/api/health", get(health_handler))
        .route("/api/users/{id}/alert-state", get(alert_state_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Queues the frame for the worker and answers with whatever cycle was
/// published last, not the result for this frame.
async fn detect_frame_handler(
    State(state): State<AppState>,
    payload: Result<Json<DetectFrameRequest>, JsonRejection>,
) -> Result<Json<LatestResult>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let image = request
        .image
        .filter(|s| !s.trim().is_empty())
        .ok_or(ApiError::MissingImage)?;
    let user_id = request.user_id.unwrap_or_default();

    let frame = tokio::task::spawn_blocking(move || decode_image(&image))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let overflowed = state.mailbox.submit(FrameTask {
        image: frame,
        captured_at: Instant::now(),
        user_id,
    });
    if overflowed {
        tracing::trace!(user = %user_id, "mailbox full, oldest frame dropped");
    }

    Ok(Json(state.results.latest().as_ref().clone()))
}

async fn alert_state_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<AlertStateResponse>, ApiError> {
    let snapshot = state
        .alerts
        .snapshot(UserId(id))
        .ok_or_else(|| ApiError::NotFound(format!("user {} not found", id)))?;

    Ok(Json(AlertStateResponse {
        user_id: snapshot.user_id,
        window: snapshot.window,
        last_trigger_ms_ago: snapshot
            .last_trigger_at
            .map(|t| t.elapsed().as_millis() as u64),
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok",
        backend: state.backend,
        users: state.alerts.user_count(),
        queued: state.mailbox.len(),
    })
}

/// Accepts raw base64 or a `data:image/...;base64,` URL.
fn decode_image(payload: &str) -> Result<Mat, ApiError> {
    let encoded = payload.split_once(',').map_or(payload, |(_, data)| data);
    let bytes = BASE64_STANDARD.decode(encoded.trim())?;
    if bytes.is_empty() {
        return Err(ApiError::Undecodable);
    }

    let buf = Vector::<u8>::from_slice(&bytes);
    let frame = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
    if frame.rows() == 0 || frame.cols() == 0 {
        return Err(ApiError::Undecodable);
    }
    Ok(frame)
}
