// Per-topic broadcast channels over the snapshot store

pub mod connection;
pub mod control;
pub mod cursor;
pub mod hub;
pub mod protocol;
pub mod seed;
pub mod topic;

pub use connection::{ChannelConnection, ConnectionId};
pub use control::{handle_control, ControlError};
pub use cursor::Cursor;
pub use hub::{TopicHub, TopicUpdate};
pub use protocol::{ClientMessage, ServerMessage};
pub use seed::{ensure_defaults, SeedReport};
pub use topic::Topic;

use crate::config::ChannelConfig;
use crate::model::EntityId;
use crate::store::SnapshotStore;
use dashmap::DashSet;
use std::sync::Arc;

/// State shared by every channel connection
pub struct RelayState {
    pub store: Arc<dyn SnapshotStore>,
    pub hub: TopicHub,
    /// Office keys deleted during this process; never handed out again
    pub retired_ids: DashSet<EntityId>,
    pub channel: ChannelConfig,
}

impl RelayState {
    pub fn new(store: Arc<dyn SnapshotStore>, channel: ChannelConfig) -> Self {
        Self {
            hub: TopicHub::new(channel.broadcast_capacity),
            store,
            retired_ids: DashSet::new(),
            channel,
        }
    }
}
