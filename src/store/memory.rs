use super::path::{value_at, write_at};
use super::{ListenerRegistry, SnapshotStore, StoreError, StorePath, Watch};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// In-process snapshot store.
///
/// Every write notifies the listeners whose path overlaps the written path,
/// and only when the subtree they see actually changed.
pub struct MemoryStore {
    tree: RwLock<Value>,
    listeners: Arc<ListenerRegistry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tree(Value::Null)
    }

    /// Start from an existing tree (useful for fixtures)
    pub fn with_tree(tree: Value) -> Self {
        let mut root = Value::Null;
        write_at(&mut root, &StorePath::root(), Some(tree));
        Self {
            tree: RwLock::new(root),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Copy of the whole tree
    pub fn dump(&self) -> Value {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn apply<F>(&self, written: &StorePath, mutate: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        mutate(&mut tree);
        // Notify while still holding the lock so listeners observe writes in order
        self.listeners
            .notify_overlapping(written, |path| value_at(&tree, path).cloned());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(value_at(&tree, path).cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.apply(path, |tree| write_at(tree, path, Some(value)));
        Ok(())
    }

    async fn update(
        &self,
        path: &StorePath,
        children: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut targets = Vec::with_capacity(children.len());
        for (key, value) in children {
            targets.push((path.join(&StorePath::parse(&key)?), value));
        }
        self.apply(path, |tree| {
            for (target, value) in targets {
                write_at(tree, &target, Some(value));
            }
        });
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        // v7 UUIDs are monotonic within the process, so key order is insertion order
        let key = Uuid::now_v7().simple().to_string();
        let target = path.child(&key)?;
        self.apply(&target, |tree| write_at(tree, &target, Some(value)));
        Ok(key)
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.apply(path, |tree| write_at(tree, path, None));
        Ok(())
    }

    fn watch(&self, path: &StorePath) -> Watch {
        // Register under the read lock so no write slips between reading the
        // initial value and the listener becoming visible
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        self.listeners
            .register(path.clone(), value_at(&tree, path).cloned())
    }

    fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
