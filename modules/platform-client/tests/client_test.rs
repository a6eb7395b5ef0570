//! PlatformClient against a local axum stand-in for the platform API.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use platform_client::{PlatformClient, PlatformError};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn metrics_are_unwrapped_from_data_envelope() {
    let app = Router::new().route(
        "/posts/{id}/metrics",
        get(|| async {
            Json(serde_json::json!({
                "data": {"views": 500, "interactions": 25, "engagement_rate": 0.05}
            }))
        }),
    );
    let client = PlatformClient::new(serve(app).await, "token".into());

    let metrics = client.get_post_performance("p1").await.unwrap();
    assert_eq!(metrics.views, 500);
    assert_eq!(metrics.interactions, 25);
    assert_eq!(metrics.engagement_rate, Some(0.05));
}

#[tokio::test]
async fn too_many_requests_maps_to_rate_limited() {
    let app = Router::new().route(
        "/posts/{id}/metrics",
        get(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "7")],
                "slow down",
            )
                .into_response()
        }),
    );
    let client = PlatformClient::new(serve(app).await, "token".into());

    let err = client.get_post_performance("p1").await.unwrap_err();
    match err {
        PlatformError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, Some(7)),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn comments_non_200_is_api_error() {
    let app = Router::new().route(
        "/posts/{id}/comments",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream down").into_response() }),
    );
    let client = PlatformClient::new(serve(app).await, "token".into());

    let err = client.get_comments("p1").await.unwrap_err();
    assert!(matches!(err, PlatformError::Api { status: 502, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn delete_missing_post_returns_false() {
    let app = Router::new().route(
        "/posts/{id}",
        axum::routing::delete(|| async { StatusCode::NOT_FOUND }),
    );
    let client = PlatformClient::new(serve(app).await, "token".into());

    assert!(!client.delete_post("gone").await.unwrap());
}

#[tokio::test]
async fn comments_parse_with_partial_records() {
    let app = Router::new().route(
        "/posts/{id}/comments",
        get(|| async {
            Json(serde_json::json!({
                "data": [
                    {"id": "c1", "post_id": "p1", "text": "love it", "author": "ana",
                     "timestamp": "2026-01-01T00:00:00Z"},
                    {"id": "c2", "text": "no author"}
                ]
            }))
        }),
    );
    let client = PlatformClient::new(serve(app).await, "token".into());

    let comments = client.get_comments("p1").await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].author.as_deref(), Some("ana"));
    assert!(comments[1].author.is_none());
}

#[tokio::test]
async fn unparseable_comment_is_skipped_not_fatal() {
    let app = Router::new().route(
        "/posts/{id}/comments",
        get(|| async {
            Json(serde_json::json!({
                "data": [
                    {"id": "c1", "text": "first", "timestamp": "2024-01-01T00:00:00Z"},
                    {"id": "c2", "text": "bad time", "timestamp": "yesterday"},
                    {"id": 42, "text": "numeric id"},
                    {"id": "c3", "text": "ok"}
                ]
            }))
        }),
    );
    let client = PlatformClient::new(serve(app).await, "token".into());

    let comments = client.get_comments("p1").await.unwrap();
    let ids: Vec<_> = comments.iter().filter_map(|c| c.id.as_deref()).collect();
    assert_eq!(ids, ["c1", "c3"]);
}
