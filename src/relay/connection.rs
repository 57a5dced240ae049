use crate::relay::control::{handle_control, ControlError};
use crate::relay::cursor::Cursor;
use crate::relay::protocol::{ClientMessage, ErrorPayload, ServerMessage};
use crate::relay::topic::Topic;
use crate::relay::RelayState;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identity of one channel connection (UUIDv7, time-ordered)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One subscriber on one topic channel, with its own cursor
pub struct ChannelConnection {
    id: ConnectionId,
    topic: Topic,
    cursor: Cursor,
}

impl ChannelConnection {
    /// New connection whose notice cursor starts `notice_lookback_seconds`
    /// in the past
    pub fn new(topic: Topic, notice_lookback_seconds: i64) -> Self {
        Self {
            id: ConnectionId::new(),
            topic,
            cursor: Cursor::new(Utc::now().timestamp() - notice_lookback_seconds),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run the connection until the client goes away.
    ///
    /// Registers exactly one store listener, which is dropped (and so
    /// deregistered) on every exit path together with the cursor.
    pub async fn handle(mut self, mut socket: WebSocket, state: Arc<RelayState>) {
        let watch_path = self.topic.watch_path();
        let mut watch = state.store.watch(&watch_path);
        let mut updates = state.hub.subscribe(self.topic);

        info!(
            connection_id = %self.id,
            topic = %self.topic,
            listener_id = watch.id(),
            "Channel connection opened"
        );

        // Initial sync: an empty cursor treats everything as new
        match state.store.get(&watch_path).await {
            Ok(snapshot) => {
                if let Some(msg) = self.cursor.delta(self.topic, snapshot.as_ref()) {
                    if let Err(e) = self.send(&mut socket, &msg).await {
                        warn!(connection_id = %self.id, error = %e, "Failed to send initial sync");
                        return;
                    }
                }
            }
            Err(e) => {
                // The listener stays registered; the next notification catches up
                warn!(connection_id = %self.id, error = %e, "Initial store read failed");
            }
        }

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let handled = self.handle_client_message(&mut socket, &state, &text).await;
                            if let Err(e) = handled {
                                error!(connection_id = %self.id, error = %e, "Failed to send error frame");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(connection_id = %self.id, "WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(connection_id = %self.id, error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(connection_id = %self.id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                changed = watch.changed() => {
                    let Some(snapshot) = changed else {
                        error!(connection_id = %self.id, "Store listener closed");
                        break;
                    };
                    if let Some(msg) = self.cursor.delta(self.topic, snapshot.as_ref()) {
                        if let Err(e) = self.send(&mut socket, &msg).await {
                            warn!(connection_id = %self.id, error = %e, "Failed to send delta");
                            break;
                        }
                    }
                }

                result = updates.recv() => {
                    match result {
                        Ok(update) => {
                            if let Some(msg) = self.cursor.absorb(&update) {
                                if let Err(e) = self.send(&mut socket, &msg).await {
                                    warn!(connection_id = %self.id, error = %e, "Failed to forward update");
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // The store notification still carries the latest state
                            warn!(connection_id = %self.id, skipped = skipped, "Skipped lagged broadcasts");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            error!(connection_id = %self.id, "Topic broadcast channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            connection_id = %self.id,
            topic = %self.topic,
            listener_id = watch.id(),
            path = %watch.path(),
            "Channel connection closed"
        );
        drop(watch);
    }

    /// Parse and apply one control message.
    ///
    /// Malformed or misrouted messages are logged and dropped. A message that
    /// fails validation or cannot be written gets an `error` frame back to this
    /// connection only. Only a failure to send that frame is returned.
    async fn handle_client_message(
        &self,
        socket: &mut WebSocket,
        state: &RelayState,
        text: &str,
    ) -> anyhow::Result<()> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Dropping malformed client message");
                return Ok(());
            }
        };
        let action = msg.action();
        debug!(connection_id = %self.id, action = action, "Control message received");

        match handle_control(state, self.topic, msg).await {
            // Delivered to this connection through the hub like everyone else
            Ok(_) => Ok(()),
            Err(e @ ControlError::WrongTopic { .. }) => {
                warn!(connection_id = %self.id, error = %e, "Dropping control message");
                Ok(())
            }
            Err(e) => {
                warn!(connection_id = %self.id, action, error = %e, "Control message failed");
                let frame = ServerMessage::Error(ErrorPayload {
                    accion: action.to_string(),
                    mensaje: e.to_string(),
                });
                self.send(socket, &frame).await
            }
        }
    }

    async fn send(&self, socket: &mut WebSocket, msg: &ServerMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        socket.send(Message::Text(json)).await?;
        Ok(())
    }
}
