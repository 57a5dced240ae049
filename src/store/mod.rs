//! Snapshot store seam.
//!
//! The relay treats the store as dumb hierarchical storage: a watched path
//! delivers the *entire* current subtree after every mutation, and all
//! diffing happens on the relay side (see `crate::detector`).

mod firebase;
mod memory;
mod path;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;
pub use path::StorePath;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::debug;


/// Errors surfaced by a snapshot store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned HTTP {status} for {path}")]
    Status { status: u16, path: String },

    #[error("failed to decode store value: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Hierarchical key-value tree with change notification
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Current value at `path`, `None` when absent
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Overwrite the node at `path`. Writing `null` removes it.
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Shallow merge of `children` into the node at `path`
    async fn update(&self, path: &StorePath, children: Map<String, Value>)
        -> Result<(), StoreError>;

    /// Append `value` under `path` with a generated, time-ordered key
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Register a listener on `path`. The listener stays registered until the
    /// returned guard is dropped.
    fn watch(&self, path: &StorePath) -> Watch;

    /// Number of currently registered listeners
    fn listener_count(&self) -> usize;
}

/// Fetch and deserialize the value at `path`
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    path: &StorePath,
) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Identity of one registered listener
pub type ListenerId = u64;

struct Listener {
    path: StorePath,
    tx: watch::Sender<Option<Value>>,
}

/// Listener bookkeeping shared by the store backends
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, Listener>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, path: StorePath, initial: Option<Value>) -> Watch {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(initial);
        self.listeners.insert(
            id,
            Listener {
                path: path.clone(),
                tx,
            },
        );
        debug!(listener_id = id, path = %path, "Listener registered");

        Watch {
            id,
            path,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    fn deregister(&self, id: ListenerId) {
        if self.listeners.remove(&id).is_some() {
            debug!(listener_id = id, "Listener removed");
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Distinct watched paths a write at `written` can affect
    pub fn overlapping(&self, written: &StorePath) -> Vec<StorePath> {
        let mut paths: Vec<StorePath> = Vec::new();
        for entry in self.listeners.iter() {
            let path = &entry.value().path;
            if path.overlaps(written) && !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }

    /// Distinct watched paths
    pub fn watched_paths(&self) -> Vec<StorePath> {
        self.overlapping(&StorePath::root())
    }

    /// Deliver `value` to every listener on exactly `path` whose last seen
    /// value differs.
    pub fn publish(&self, path: &StorePath, value: &Option<Value>) {
        for entry in self.listeners.iter() {
            let listener = entry.value();
            if &listener.path == path {
                deliver(&listener.tx, value);
            }
        }
    }

    /// Deliver to every listener overlapping `written`, reading each
    /// listener's subtree through `read`.
    pub fn notify_overlapping<F>(&self, written: &StorePath, read: F)
    where
        F: Fn(&StorePath) -> Option<Value>,
    {
        for entry in self.listeners.iter() {
            let listener = entry.value();
            if listener.path.overlaps(written) {
                deliver(&listener.tx, &read(&listener.path));
            }
        }
    }
}

fn deliver(tx: &watch::Sender<Option<Value>>, value: &Option<Value>) {
    tx.send_if_modified(|current| {
        if current != value {
            current.clone_from(value);
            true
        } else {
            false
        }
    });
}

/// Guard for one registered listener.
///
/// Dropping it deregisters the listener synchronously.
pub struct Watch {
    id: ListenerId,
    path: StorePath,
    rx: watch::Receiver<Option<Value>>,
    registry: Weak<ListenerRegistry>,
}

impl Watch {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Wait for the next change and return the full subtree. Returns `None`
    /// once the store has gone away.
    pub async fn changed(&mut self) -> Option<Option<Value>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Last subtree delivered to this listener
    pub fn current(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}
