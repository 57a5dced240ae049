//! Firebase Realtime Database backend over the REST API.
//!
//! Change notification is done by polling each watched path and publishing
//! the subtree when it differs from what the listener last saw. Local writes
//! refresh the overlapping watched paths immediately.

use super::path::normalize;
use super::{ListenerRegistry, SnapshotStore, StoreError, StorePath, Watch};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response body of a REST `POST` (push)
#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

/// Per watched path count of refreshes started.
///
/// A fetch result is published only if no refresh of the same path started
/// after the fetch did, so an older response never overwrites a newer one.
#[derive(Default)]
struct FetchFence {
    generations: DashMap<StorePath, u64>,
}

impl FetchFence {
    fn current(&self, path: &StorePath) -> u64 {
        self.generations.get(path).map(|g| *g).unwrap_or(0)
    }

    fn advance(&self, path: &StorePath) -> u64 {
        let mut generation = self.generations.entry(path.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Run `publish` while holding the path's entry, unless it moved past `seen`
    fn publish_if_current<F: FnOnce()>(&self, path: &StorePath, seen: u64, publish: F) -> bool {
        let generation = self.generations.entry(path.clone()).or_insert(0);
        if *generation != seen {
            return false;
        }
        publish();
        true
    }
}

pub struct FirebaseStore {
    http: reqwest::Client,
    base_url: String,
    namespace: StorePath,
    listeners: Arc<ListenerRegistry>,
    fence: FetchFence,
}

impl FirebaseStore {
    /// `database_url` is the RTDB root (e.g. `https://<db>.firebaseio.com`);
    /// all paths are resolved under `namespace`.
    pub fn new(
        database_url: &str,
        namespace: &str,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: database_url.trim_end_matches('/').to_string(),
            namespace: StorePath::parse(namespace)?,
            listeners: ListenerRegistry::new(),
            fence: FetchFence::default(),
        })
    }

    fn url(&self, path: &StorePath) -> String {
        let full = self.namespace.join(path);
        if full.is_root() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{}.json", self.base_url, full.segments().join("/"))
        }
    }

    fn check(
        path: &StorePath,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(StoreError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            })
        }
    }

    async fn fetch(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let response = self.http.get(self.url(path)).send().await?;
        let value: Value = Self::check(path, response)?.json().await?;
        Ok(normalize(value))
    }

    /// Publish a fetched subtree unless a newer refresh of `path` started
    /// after the fetch began at generation `seen`.
    fn publish_fetched(&self, path: &StorePath, seen: u64, value: &Option<Value>) -> bool {
        let published = self
            .fence
            .publish_if_current(path, seen, || self.listeners.publish(path, value));
        if !published {
            debug!(path = %path, "Dropping superseded fetch");
        }
        published
    }

    /// Re-read every watched path a write at `written` can affect
    async fn refresh(&self, written: &StorePath) {
        for path in self.listeners.overlapping(written) {
            let seen = self.fence.advance(&path);
            match self.fetch(&path).await {
                Ok(value) => {
                    self.publish_fetched(&path, seen, &value);
                }
                Err(e) => warn!(path = %path, error = %e, "Failed to refresh watched path"),
            }
        }
    }

    /// Poll every watched path once
    pub async fn poll_once(&self) {
        for path in self.listeners.watched_paths() {
            let seen = self.fence.current(&path);
            match self.fetch(&path).await {
                Ok(value) => {
                    self.publish_fetched(&path, seen, &value);
                }
                // Transient; the next tick retries
                Err(e) => warn!(path = %path, error = %e, "Failed to poll watched path"),
            }
        }
    }

    /// Poll loop. Runs until the task is aborted.
    pub async fn run_poller(self: Arc<Self>, interval: Duration) {
        let interval = if interval.is_zero() {
            warn!("Poll interval 0 raised to 1ms");
            Duration::from_millis(1)
        } else {
            interval
        };
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting Firebase change poller"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.listeners.is_empty() {
                continue;
            }
            self.poll_once().await;
        }
    }
}

#[async_trait]
impl SnapshotStore for FirebaseStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.fetch(path).await
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let response = self.http.put(self.url(path)).json(&value).send().await?;
        Self::check(path, response)?;
        debug!(path = %path, "Store set");
        self.refresh(path).await;
        Ok(())
    }

    async fn update(
        &self,
        path: &StorePath,
        children: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.url(path))
            .json(&children)
            .send()
            .await?;
        Self::check(path, response)?;
        debug!(path = %path, "Store update");
        self.refresh(path).await;
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let response = self.http.post(self.url(path)).json(&value).send().await?;
        let pushed: PushResponse = Self::check(path, response)?.json().await?;
        debug!(path = %path, key = %pushed.name, "Store push");
        self.refresh(path).await;
        Ok(pushed.name)
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let response = self.http.delete(self.url(path)).send().await?;
        Self::check(path, response)?;
        debug!(path = %path, "Store remove");
        self.refresh(path).await;
        Ok(())
    }

    fn watch(&self, path: &StorePath) -> Watch {
        // The first poll (or the connection's own initial read) fills it in
        self.listeners.register(path.clone(), None)
    }

    fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(namespace: &str) -> FirebaseStore {
        FirebaseStore::new(
            "https://example.firebaseio.com/",
            namespace,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_url_resolves_under_namespace() {
        let store = store("monitoreo_consumo");
        let path = StorePath::parse("oficinas/A/resumenes").unwrap();
        assert_eq!(
            store.url(&path),
            "https://example.firebaseio.com/monitoreo_consumo/oficinas/A/resumenes.json"
        );
    }

    #[test]
    fn test_url_for_root() {
        let store = store("");
        assert_eq!(
            store.url(&StorePath::root()),
            "https://example.firebaseio.com/.json"
        );
    }

    #[test]
    fn test_stale_poll_dropped_after_refresh() {
        let store = store("monitoreo_consumo");
        let path = StorePath::parse("oficinas").unwrap();
        let watch = store.watch(&path);

        // Poll fetch starts, then a write's refresh starts and lands first
        let poll_seen = store.fence.current(&path);
        let refresh_seen = store.fence.advance(&path);
        let fresh = Some(json!({"A": {"estados_dispositivos": {"aire": false}}}));
        assert!(store.publish_fetched(&path, refresh_seen, &fresh));

        let stale = Some(json!({"A": {"estados_dispositivos": {"aire": true}}}));
        assert!(!store.publish_fetched(&path, poll_seen, &stale));
        assert_eq!(watch.current(), fresh);
    }

    #[test]
    fn test_older_refresh_dropped_after_newer_refresh() {
        let store = store("monitoreo_consumo");
        let path = StorePath::parse("params").unwrap();
        let watch = store.watch(&path);

        let first = store.fence.advance(&path);
        let second = store.fence.advance(&path);
        assert!(store.publish_fetched(&path, second, &Some(json!({"voltaje": 110}))));
        assert!(!store.publish_fetched(&path, first, &Some(json!({"voltaje": 220}))));
        assert_eq!(watch.current(), Some(json!({"voltaje": 110})));
    }

    #[test]
    fn test_poll_published_when_no_refresh_intervened() {
        let store = store("monitoreo_consumo");
        let path = StorePath::parse("params").unwrap();
        let watch = store.watch(&path);

        let seen = store.fence.current(&path);
        assert!(store.publish_fetched(&path, seen, &Some(json!({"voltaje": 220}))));
        assert_eq!(watch.current(), Some(json!({"voltaje": 220})));
    }

    #[test]
    fn test_watch_guard_deregisters() {
        let store = store("monitoreo_consumo");
        let watch = store.watch(&StorePath::parse("params").unwrap());
        assert_eq!(store.listener_count(), 1);
        assert!(watch.current().is_none());
        drop(watch);
        assert_eq!(store.listener_count(), 0);
    }
}
