use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use tracing::info;

use crate::AppState;

/// Always 200: failures are reported inside the body so webhook callers get an answer.
pub async fn api_ingest_comments(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<String>,
) -> impl IntoResponse {
    info!(post_id = %post_id, "Comment ingestion requested");
    Json(state.ingestion.process(&post_id).await)
}
