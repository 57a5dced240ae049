use crate::model::{DeviceState, EntityId, OfficeInfo, Parameters};
use crate::relay::topic::Topic;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Value written by a control message, fanned out to every open connection
/// on the topic it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub enum TopicUpdate {
    Devices(BTreeMap<EntityId, DeviceState>),
    Params(Parameters),
    Roster(BTreeMap<EntityId, OfficeInfo>),
}

impl TopicUpdate {
    pub fn topic(&self) -> Topic {
        match self {
            TopicUpdate::Devices(_) => Topic::Dispositivos,
            TopicUpdate::Params(_) => Topic::Params,
            TopicUpdate::Roster(_) => Topic::Oficinas,
        }
    }
}

/// One broadcast channel per topic
pub struct TopicHub {
    senders: [broadcast::Sender<TopicUpdate>; Topic::ALL.len()],
}

impl TopicHub {
    /// `capacity` below 1 is raised to 1
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            warn!("Broadcast capacity 0 raised to 1");
        }
        let capacity = capacity.max(1);
        Self {
            senders: Topic::ALL.map(|_| broadcast::channel(capacity).0),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<TopicUpdate> {
        self.senders[topic.index()].subscribe()
    }

    /// Send to every subscriber of the update's topic. Returns how many
    /// connections it reached.
    pub fn publish(&self, update: TopicUpdate) -> usize {
        let topic = update.topic();
        match self.senders[topic.index()].send(update) {
            Ok(reached) => reached,
            Err(_) => {
                debug!(topic = %topic, "No open connections for broadcast");
                0
            }
        }
    }

    /// Open connections on `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.senders[topic.index()].receiver_count()
    }
}
