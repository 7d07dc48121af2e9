//! Process configuration from environment variables
//!
//! ```bash
//! # Relay server
//! FLEETLINK_VEHICLE_ADDR=0.0.0.0:4433 \
//! FLEETLINK_DISPATCHER_ADDR=0.0.0.0:4434 \
//! FLEETLINK_CERT=config/localhost.pem \
//! FLEETLINK_KEY=config/localhost-key.pem \
//! FLEETLINK_REDIS_URL=redis://127.0.0.1:6379/0 \
//! fleetlink-relay
//!
//! # Admin API
//! SECRET_KEY=... FLEETLINK_ADMIN_ADDR=127.0.0.1:8080 fleetlink-admin
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Configuration for the relay server binary.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Vehicle-facing QUIC listener address.
    pub vehicle_addr: SocketAddr,
    /// Dispatcher-facing QUIC listener address.
    pub dispatcher_addr: SocketAddr,
    /// TLS certificate chain, PEM.
    pub cert_path: PathBuf,
    /// TLS private key, PEM.
    pub key_path: PathBuf,
    /// Credential store URL.
    pub redis_url: String,
    /// How long in-flight connections get to finish on shutdown before the
    /// supervisor cancels them.
    pub drain_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            vehicle_addr: env_or(
                "FLEETLINK_VEHICLE_ADDR",
                "0.0.0.0:4433".parse().expect("static addr"),
            ),
            dispatcher_addr: env_or(
                "FLEETLINK_DISPATCHER_ADDR",
                "0.0.0.0:4434".parse().expect("static addr"),
            ),
            cert_path: PathBuf::from(env_string("FLEETLINK_CERT", "config/localhost.pem")),
            key_path: PathBuf::from(env_string("FLEETLINK_KEY", "config/localhost-key.pem")),
            redis_url: env_string("FLEETLINK_REDIS_URL", "redis://127.0.0.1:6379/0"),
            drain_timeout: Duration::from_secs(env_or("FLEETLINK_DRAIN_SECS", 5)),
        }
    }
}

/// Configuration for the admin API binary.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// HTTP listener address.
    pub listen_addr: SocketAddr,
    /// Credential store URL.
    pub redis_url: String,
    /// Value every request must present in `X-Secret`.
    pub secret_key: String,
}

impl AdminConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env_or(
                "FLEETLINK_ADMIN_ADDR",
                "127.0.0.1:8080".parse().expect("static addr"),
            ),
            redis_url: env_string("FLEETLINK_REDIS_URL", "redis://127.0.0.1:6379/0"),
            secret_key: env_string("SECRET_KEY", ""),
        }
    }
}
