//! REST endpoint tests against in-memory collaborators (no server, no database).

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use variantwatch_api::{build_router, AppState};
use variantwatch_common::{RawComment, VariantPerformance};
use variantwatch_monitor::{
    CommentSource, EarlyKillMonitor, IngestionPipeline, KillCleanup, MemoryTaskQueue,
    MetricsSource, MonitorScheduler, NoopRotation, PollIntervals, PostDeleter, RateLimiter,
    SourceError, SystemClock,
};
use variantwatch_store::MemoryStore;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct FakePlatform {
    comments_down: bool,
}

#[async_trait]
impl MetricsSource for FakePlatform {
    async fn get_post_performance(&self, _post_id: &str) -> Result<VariantPerformance, SourceError> {
        Ok(VariantPerformance {
            views: 100,
            total_interactions: 5,
            engagement_rate: 0.05,
            last_updated: Utc::now(),
        })
    }
}

#[async_trait]
impl CommentSource for FakePlatform {
    async fn get_comments(&self, post_id: &str) -> Result<Vec<RawComment>, SourceError> {
        if self.comments_down {
            return Err(SourceError::Failed("503 upstream unavailable".to_string()));
        }
        Ok(["c1", "c2", "c1"]
            .iter()
            .map(|id| RawComment {
                id: Some(id.to_string()),
                post_id: Some(post_id.to_string()),
                text: Some("nice".to_string()),
                author: None,
                timestamp: None,
            })
            .collect())
    }
}

#[async_trait]
impl PostDeleter for FakePlatform {
    async fn delete_post(&self, _post_id: &str) -> Result<bool, SourceError> {
        Ok(true)
    }
}

fn test_app(comments_down: bool) -> axum::Router {
    let platform = Arc::new(FakePlatform { comments_down });
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(100.0, 100.0);

    let cleanup = KillCleanup::new(Arc::new(NoopRotation), platform.clone(), limiter.clone());
    let monitor = Arc::new(EarlyKillMonitor::new(
        store.clone(),
        cleanup,
        Arc::new(SystemClock),
    ));
    let scheduler = Arc::new(MonitorScheduler::new(
        monitor,
        platform.clone(),
        limiter.clone(),
        PollIntervals::default(),
    ));
    let ingestion = IngestionPipeline::new(
        platform,
        store,
        Arc::new(MemoryTaskQueue::new()),
        limiter,
    );

    build_router(Arc::new(AppState {
        scheduler,
        ingestion,
    }))
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(b) => {
            req = req.header("content-type", "application/json");
            Body::from(serde_json::to_string(&b).unwrap())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(json!({}));
    (status, json)
}

fn start_body(variant_id: &str) -> Value {
    json!({
        "variant_id": variant_id,
        "persona_id": "persona-1",
        "post_id": "post-1",
        "expected_engagement_rate": 0.06,
    })
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check() {
    let app = test_app(false);
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn start_is_accepted_then_conflicts() {
    let app = test_app(false);

    let (status, json) = send(&app, "POST", "/api/monitoring", Some(start_body("v1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["variant_id"], "v1");
    assert_eq!(json["is_active"], true);

    let (status, json) = send(&app, "POST", "/api/monitoring", Some(start_body("v1"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "already_monitoring");
}

#[tokio::test]
async fn start_rejects_out_of_range_rate() {
    let app = test_app(false);
    let mut body = start_body("v1");
    body["expected_engagement_rate"] = json!(2.0);

    let (status, json) = send(&app, "POST", "/api/monitoring", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn start_with_unreadable_body_gets_json_error() {
    let app = test_app(false);

    let (status, json) = send(&app, "POST", "/api/monitoring", Some(json!({"variant_id": "v1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
    assert!(json["message"].as_str().unwrap().contains("persona_id"));

    let (status, json) = send(&app, "POST", "/api/monitoring", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn status_and_list() {
    let app = test_app(false);
    send(&app, "POST", "/api/monitoring", Some(start_body("v1"))).await;
    send(&app, "POST", "/api/monitoring", Some(start_body("v2"))).await;

    let (status, json) = send(&app, "GET", "/api/monitoring/v1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "active");

    let (status, json) = send(&app, "GET", "/api/monitoring", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sessions"].as_array().unwrap().len(), 2);

    let (status, json) = send(&app, "GET", "/api/monitoring/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn stop_ends_session_once() {
    let app = test_app(false);
    send(&app, "POST", "/api/monitoring", Some(start_body("v1"))).await;

    let (status, json) = send(&app, "POST", "/api/monitoring/v1/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "manually_stopped");
    assert_eq!(json["is_active"], false);

    let (status, _) = send(&app, "POST", "/api/monitoring/v1/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send(&app, "GET", "/api/monitoring", None).await;
    assert!(json["sessions"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingest_reports_counts() {
    let app = test_app(false);

    let (status, json) = send(&app, "POST", "/api/posts/post-1/comments/ingest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"status": "success", "processed_count": 3, "queued_count": 2, "stored_count": 2})
    );

    let (_, json) = send(&app, "POST", "/api/posts/post-1/comments/ingest", None).await;
    assert_eq!(json["stored_count"], 0);
}

#[tokio::test]
async fn ingest_failure_is_still_200() {
    let app = test_app(true);

    let (status, json) = send(&app, "POST", "/api/posts/post-1/comments/ingest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().unwrap().contains("503"));
}
