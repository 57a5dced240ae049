use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

/// Complete relay configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub relay: ChannelConfig,
}

/// HTTP / WebSocket listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process tree, lost on restart
    #[default]
    Memory,
    /// Firebase Realtime Database over REST
    Firebase,
}

/// Snapshot store backend
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Required for the firebase backend, e.g. `https://<db>.firebaseio.com`
    #[serde(default)]
    pub database_url: Option<String>,
    /// Root node every relay path lives under
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_namespace() -> String {
    "monitoreo_consumo".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl StoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: None,
            namespace: default_namespace(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Per-connection channel behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// How far back a new notice subscriber starts (seconds)
    #[serde(default = "default_notice_lookback")]
    pub notice_lookback_seconds: i64,
    /// Buffered control broadcasts per topic before slow connections lag
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Write default params, notice types and offices on startup
    #[serde(default = "default_seed_defaults")]
    pub seed_defaults: bool,
}

fn default_notice_lookback() -> i64 {
    180
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_seed_defaults() -> bool {
    true
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            notice_lookback_seconds: default_notice_lookback(),
            broadcast_capacity: default_broadcast_capacity(),
            seed_defaults: default_seed_defaults(),
        }
    }
}

impl RelayConfig {
    /// Overlay environment variables on top of the file values.
    ///
    /// Setting `FIREBASE_DATABASE_URL` also selects the firebase backend.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("RELAY_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = var("FIREBASE_DATABASE_URL") {
            self.store.backend = StoreBackend::Firebase;
            self.store.database_url = Some(v);
        }
        if let Some(v) = var("RELAY_STORE_NAMESPACE") {
            self.store.namespace = v;
        }
        if let Some(v) = var("RELAY_NOTICE_LOOKBACK_SECONDS") {
            if let Ok(n) = v.parse::<i64>() {
                self.relay.notice_lookback_seconds = n;
            }
        }
    }

    /// Reject values that parse but cannot drive the relay
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.relay.broadcast_capacity > 0,
            "relay.broadcast_capacity must be at least 1"
        );
        anyhow::ensure!(
            self.store.poll_interval_ms > 0,
            "store.poll_interval_ms must be at least 1"
        );
        anyhow::ensure!(
            self.store.request_timeout_ms > 0,
            "store.request_timeout_ms must be at least 1"
        );
        anyhow::ensure!(
            self.relay.notice_lookback_seconds >= 0,
            "relay.notice_lookback_seconds must not be negative"
        );
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<RelayConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let config: RelayConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path))?;
    Ok(config)
}
