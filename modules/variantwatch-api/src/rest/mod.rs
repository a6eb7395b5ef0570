pub mod ingest;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::warn;

use variantwatch_monitor::{MonitorError, StartMonitoring};

use crate::AppState;

// --- Helpers ---

fn error_response(status: StatusCode, code: &str, message: impl ToString) -> Response {
    (
        status,
        Json(serde_json::json!({"error": code, "message": message.to_string()})),
    )
        .into_response()
}

fn monitor_error_response(err: MonitorError) -> Response {
    match err {
        MonitorError::AlreadyMonitoring(_) => {
            error_response(StatusCode::CONFLICT, "already_monitoring", err)
        }
        MonitorError::NotFound(_) => error_response(StatusCode::NOT_FOUND, "not_found", err),
        MonitorError::InvalidRequest(_) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", err)
        }
        MonitorError::Store(ref e) => {
            warn!(error = %e, "Monitoring store failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal error")
        }
    }
}

// --- Monitoring ---

pub async fn api_start_monitoring(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartMonitoring>, JsonRejection>,
) -> impl IntoResponse {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    };
    match state.scheduler.start(body).await {
        Ok(session) => (StatusCode::ACCEPTED, Json(session)).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

pub async fn api_list_active(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scheduler.monitor().list_active().await {
        Ok(sessions) => Json(serde_json::json!({ "sessions": sessions })).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

pub async fn api_monitoring_status(
    State(state): State<Arc<AppState>>,
    Path(variant_id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.monitor().get_status(&variant_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

pub async fn api_stop_monitoring(
    State(state): State<Arc<AppState>>,
    Path(variant_id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.stop(&variant_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => monitor_error_response(e),
    }
}
