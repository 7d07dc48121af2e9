//! Fleetlink admin API server
//!
//! HTTP CRUD over vehicle and dispatcher records, gated by the `X-Secret`
//! header against the `SECRET_KEY` environment variable. Writes go to the
//! same Redis store the relay reads at stream attach time.
//!
//! ## Usage
//!
//! ```bash
//! SECRET_KEY=change-me FLEETLINK_ADMIN_ADDR=127.0.0.1:8080 fleetlink-admin
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetlink::admin::{self, AdminState};
use fleetlink::store::redis::RedisStore;
use fleetlink::AdminConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = AdminConfig::from_env();
    if config.secret_key.is_empty() {
        warn!("SECRET_KEY is empty; every request with an empty X-Secret will pass");
    }
    info!("Fleetlink admin API starting on {}", config.listen_addr);

    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("connecting to credential store")?;
    let store = Arc::new(store);
    let state = AdminState::new(store.clone(), store, config.secret_key);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        signal_token.cancel();
    });

    admin::serve(config.listen_addr, state, shutdown).await
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetlink=info".parse().expect("static directive")),
        )
        .init();
}
