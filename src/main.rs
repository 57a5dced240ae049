use anyhow::{Context, Result};
use consumo_relay::api::create_relay_router;
use consumo_relay::config::{load_config, RelayConfig, StoreBackend, StoreConfig};
use consumo_relay::relay::{ensure_defaults, RelayState};
use consumo_relay::store::{FirebaseStore, MemoryStore, SnapshotStore};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consumo_relay=info".into()),
        )
        .init();

    info!("Consumo relay starting...");

    let mut config = match std::env::var("RELAY_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => RelayConfig::default(),
    };
    config.apply_env();
    config.validate().context("Invalid relay configuration")?;

    info!(
        bind_addr = %config.server.bind_addr,
        backend = ?config.store.backend,
        namespace = %config.store.namespace,
        notice_lookback_seconds = config.relay.notice_lookback_seconds,
        "Configuration loaded"
    );

    let store = build_store(&config.store)?;

    if config.relay.seed_defaults {
        ensure_defaults(store.as_ref()).await;
    }

    let state = Arc::new(RelayState::new(store, config.relay.clone()));
    let router = create_relay_router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Relay listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Relay server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Consumo relay stopped");

    Ok(())
}

fn build_store(config: &StoreConfig) -> Result<Arc<dyn SnapshotStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory snapshot store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Firebase => {
            let database_url = config
                .database_url
                .as_deref()
                .context("FIREBASE_DATABASE_URL or store.database_url is required for firebase")?;
            let store = Arc::new(
                FirebaseStore::new(database_url, &config.namespace, config.request_timeout())
                    .context("Failed to initialize Firebase store")?,
            );

            tokio::spawn(Arc::clone(&store).run_poller(config.poll_interval()));
            info!(
                database_url = %database_url,
                poll_interval_ms = config.poll_interval_ms,
                "Using Firebase snapshot store"
            );
            Ok(store)
        }
    }
}
