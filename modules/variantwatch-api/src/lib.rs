//! HTTP surface for variant monitoring and comment ingestion.

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use variantwatch_monitor::{IngestionPipeline, MonitorScheduler};

pub mod rest;

pub struct AppState {
    pub scheduler: Arc<MonitorScheduler>,
    pub ingestion: IngestionPipeline,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Monitoring
        .route(
            "/api/monitoring",
            get(rest::api_list_active).post(rest::api_start_monitoring),
        )
        .route("/api/monitoring/{variant_id}", get(rest::api_monitoring_status))
        .route("/api/monitoring/{variant_id}/stop", post(rest::api_stop_monitoring))
        // Ingestion
        .route(
            "/api/posts/{post_id}/comments/ingest",
            post(rest::ingest::api_ingest_comments),
        )
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
