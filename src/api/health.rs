use crate::relay::{RelayState, Topic};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Registered store listeners (one per open connection)
    pub store_listeners: usize,
    /// Open connections per topic
    pub connections: BTreeMap<&'static str, usize>,
}

/// GET /health
pub fn create_health_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    let connections = Topic::ALL
        .into_iter()
        .map(|topic| (topic.name(), state.hub.subscriber_count(topic)))
        .collect();

    Json(HealthResponse {
        status: "ok",
        store_listeners: state.store.listener_count(),
        connections,
    })
}
