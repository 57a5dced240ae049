// HTTP and WebSocket APIs

pub mod health;
pub mod websocket;

pub use health::{create_health_router, HealthResponse};
pub use websocket::create_ws_router;

use crate::relay::RelayState;
use axum::Router;
use std::sync::Arc;

/// Every relay route: one WebSocket channel per topic plus `/health`
pub fn create_relay_router(state: Arc<RelayState>) -> Router {
    create_ws_router(Arc::clone(&state)).merge(create_health_router(state))
}
