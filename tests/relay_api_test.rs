// Router-level tests for the relay HTTP surface.
//
// Note: Tests use tower::ServiceExt::oneshot, so requests to a topic route
// reach the WebSocketUpgrade extractor without a real connection and get a
// 4xx rejection. The tests only check that topic routes exist (non-404) and
// that anything else is a 404.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use consumo_relay::{
    api::create_relay_router,
    config::ChannelConfig,
    relay::{RelayState, Topic},
    store::MemoryStore,
};
use std::sync::Arc;
use tower::ServiceExt;

fn make_router() -> Router {
    let state = Arc::new(RelayState::new(
        Arc::new(MemoryStore::new()),
        ChannelConfig::default(),
    ));
    create_relay_router(state)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_every_topic_route_exists() {
    for topic in Topic::ALL {
        let resp = make_router()
            .oneshot(get_request(&topic.route()))
            .await
            .unwrap();
        assert_ne!(resp.status(), StatusCode::NOT_FOUND, "{}", topic.route());
        assert!(resp.status().is_client_error());
    }
}

#[tokio::test]
async fn test_unknown_channel_returns_404() {
    let resp = make_router()
        .oneshot(get_request("/ws/consumos"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_root_returns_404() {
    let resp = make_router().oneshot(get_request("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_to_topic_not_allowed() {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/ws/params")
        .body(Body::empty())
        .unwrap();
    let resp = make_router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_reports_counts() {
    let resp = make_router().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store_listeners"], 0);
    assert_eq!(json["connections"]["resumenes"], 0);
    assert_eq!(json["connections"]["tipos_avisos"], 0);
}
