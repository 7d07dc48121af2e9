//! Fleetlink relay server
//!
//! Accepts vehicle connections on one QUIC listener and dispatcher
//! connections on another, fanning live video and telemetry out through the
//! in-process stream registry. Credentials come from the Redis store the
//! admin API writes to.
//!
//! ## Usage
//!
//! ```bash
//! FLEETLINK_CERT=config/localhost.pem \
//! FLEETLINK_KEY=config/localhost-key.pem \
//! FLEETLINK_REDIS_URL=redis://127.0.0.1:6379/0 \
//! fleetlink-relay
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleetlink::store::redis::RedisStore;
use fleetlink::{RelayConfig, RelayServer, StreamRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = RelayConfig::from_env();
    info!("Fleetlink relay starting");
    info!("  Vehicle listener: {}", config.vehicle_addr);
    info!("  Dispatcher listener: {}", config.dispatcher_addr);
    info!("  Credential store: {}", config.redis_url);

    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("connecting to credential store")?;
    let store = Arc::new(store);

    let registry = Arc::new(StreamRegistry::new());
    let relay = RelayServer::new(config, registry, store.clone(), store)
        .bind()
        .context("binding QUIC listeners")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        signal_token.cancel();
    });

    relay.run(shutdown).await
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetlink=info".parse().expect("static directive")),
        )
        .init();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
