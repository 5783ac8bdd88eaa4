use super::control::ServerState;
use crate::session::{StartOutcome, StopOutcome};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamRequest {
    pub camera_id: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub face_detection_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopStreamRequest {
    pub camera_id: String,
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid request" })),
    )
        .into_response()
}

/// Liveness probe
pub async fn health_handler() -> &'static str {
    "OK"
}

pub async fn start_stream_handler(
    State(state): State<ServerState>,
    payload: Result<Json<StartStreamRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            debug!("Rejected start-stream body: {}", rejection);
            return invalid_request();
        }
    };

    match state.manager.start(
        &request.camera_id,
        &request.rtsp_url,
        request.face_detection_enabled,
    ) {
        StartOutcome::Started => message(StatusCode::OK, "Stream processing initiated"),
        StartOutcome::Conflict => message(StatusCode::CONFLICT, "Stream already running"),
        StartOutcome::Invalid(reason) => {
            debug!(camera_id = %request.camera_id, "Invalid start request: {}", reason);
            invalid_request()
        }
        StartOutcome::ShuttingDown => {
            warn!(camera_id = %request.camera_id, "Start refused during shutdown");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Worker shutting down" })),
            )
                .into_response()
        }
    }
}

pub async fn stop_stream_handler(
    State(state): State<ServerState>,
    payload: Result<Json<StopStreamRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            debug!("Rejected stop-stream body: {}", rejection);
            return invalid_request();
        }
    };

    match state.manager.stop(&request.camera_id) {
        StopOutcome::Stopped => message(StatusCode::OK, "Stream stopped"),
        StopOutcome::NotFound => message(StatusCode::NOT_FOUND, "Stream not found"),
    }
}

/// Active sessions, for operators
pub async fn list_streams_handler(State(state): State<ServerState>) -> Response {
    let health = state.manager.health();
    Json(json!({
        "status": health.status,
        "activeSessions": health.active_sessions,
        "streams": state.manager.sessions(),
    }))
    .into_response()
}
