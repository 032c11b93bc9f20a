/*!
HTTP surface: live MJPEG feed, on-demand classification and status.
*/

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;
use shared::ClassificationResult;
use tower_http::trace::TraceLayer;

use crate::cache::FrameCache;
use crate::stats::{SharedStats, StatsSnapshot};
use crate::stream::{mjpeg_stream, StreamPacing, MJPEG_CONTENT_TYPE};
use crate::trigger::ClassificationTrigger;

/// State shared by all request handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FrameCache>,
    pub stats: SharedStats,
    /// `None` when classification is disabled
    pub trigger: Option<ClassificationTrigger>,
    pub pacing: StreamPacing,
}

/// Handler errors rendered as JSON bodies
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no frame has been captured yet")]
    NoFrame,

    #[error("classification is disabled")]
    ClassifierDisabled,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NoFrame => (StatusCode::NOT_FOUND, "NO_FRAME"),
            ApiError::ClassifierDisabled => (StatusCode::SERVICE_UNAVAILABLE, "CLASSIFIER_DISABLED"),
        };
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// `/analyze` response body
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub material: u8,
    pub label: &'static str,
    pub description: String,
    pub requested_at: DateTime<Local>,
}

impl From<&ClassificationResult> for AnalyzeResponse {
    fn from(result: &ClassificationResult) -> Self {
        Self {
            material: result.material.code(),
            label: result.material.label(),
            description: result.description.clone(),
            requested_at: result.requested_at,
        }
    }
}

/// `/status` response body
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub cache_generation: u64,
    pub classification_enabled: bool,
    #[serde(flatten)]
    pub capture: StatsSnapshot,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/analyze", get(analyze))
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let stream = mjpeg_stream(Arc::clone(&state.cache), state.pacing);
    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
}

/// Classify the cached frame without driving the actuator
async fn analyze(State(state): State<AppState>) -> Result<Json<AnalyzeResponse>, ApiError> {
    let trigger = state.trigger.as_ref().ok_or(ApiError::ClassifierDisabled)?;
    let frame = state.cache.get().ok_or(ApiError::NoFrame)?;
    let result = trigger.classify(&frame).await;
    Ok(Json(AnalyzeResponse::from(&result)))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let capture = state.stats.read().clone();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        cache_generation: state.cache.generation(),
        classification_enabled: state.trigger.is_some(),
        capture,
    })
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
