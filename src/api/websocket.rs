use crate::relay::{ChannelConnection, RelayState, Topic};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

/// One `GET /ws/<topic>` upgrade route per topic. Any other path falls
/// through to the router's 404.
pub fn create_ws_router(state: Arc<RelayState>) -> Router {
    Topic::ALL
        .into_iter()
        .fold(Router::<Arc<RelayState>>::new(), |router, topic| {
            router.route(
                &topic.route(),
                get(
                    move |ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>| {
                        ws_handler(topic, ws, state)
                    },
                ),
            )
        })
        .with_state(state)
}

async fn ws_handler(topic: Topic, ws: WebSocketUpgrade, state: Arc<RelayState>) -> Response {
    info!(topic = %topic, "WebSocket upgrade request received");
    let lookback = state.channel.notice_lookback_seconds;
    ws.on_upgrade(move |socket| ChannelConnection::new(topic, lookback).handle(socket, state))
}
