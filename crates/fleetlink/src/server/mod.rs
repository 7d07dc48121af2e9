//! QUIC relay server
//!
//! Two listeners share one process: the vehicle-facing ingress
//! ([`vehicle`]) and the dispatcher-facing egress ([`dispatcher`]). Both
//! read credentials from the store at attach time and meet in the
//! [`StreamRegistry`]; there is no other coupling between connections.
//!
//! Shutdown is hierarchical: cancelling the supervisor token stops the
//! accept loops, in-flight connections get the configured drain window, and
//! whatever is still running is force-cancelled afterwards.

pub mod dispatcher;
pub mod vehicle;

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use quinn::VarInt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::close_code;
use crate::protocol::ALPN;
use crate::registry::StreamRegistry;
use crate::store::{DispatcherStore, VehicleStore};

/// Everything a connection handler needs, passed by `Arc` — the registry is
/// process-scoped state, not ambient state.
pub(crate) struct Shared {
    pub registry: Arc<StreamRegistry>,
    pub vehicles: Arc<dyn VehicleStore>,
    pub dispatchers: Arc<dyn DispatcherStore>,
}

/// The relay server before binding its sockets.
pub struct RelayServer {
    config: RelayConfig,
    shared: Arc<Shared>,
}

impl RelayServer {
    pub fn new(
        config: RelayConfig,
        registry: Arc<StreamRegistry>,
        vehicles: Arc<dyn VehicleStore>,
        dispatchers: Arc<dyn DispatcherStore>,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                registry,
                vehicles,
                dispatchers,
            }),
        }
    }

    /// Load TLS material and bind both QUIC listeners.
    pub fn bind(self) -> Result<BoundRelay> {
        let server_config = server_config_from_pem(&self.config)?;

        let vehicle_endpoint =
            quinn::Endpoint::server(server_config.clone(), self.config.vehicle_addr)
                .with_context(|| format!("binding vehicle listener {}", self.config.vehicle_addr))?;
        let dispatcher_endpoint =
            quinn::Endpoint::server(server_config, self.config.dispatcher_addr).with_context(
                || format!("binding dispatcher listener {}", self.config.dispatcher_addr),
            )?;

        Ok(BoundRelay {
            vehicle_endpoint,
            dispatcher_endpoint,
            shared: self.shared,
            drain_timeout: self.config.drain_timeout,
        })
    }
}

/// A bound relay, ready to serve until the shutdown token fires.
pub struct BoundRelay {
    vehicle_endpoint: quinn::Endpoint,
    dispatcher_endpoint: quinn::Endpoint,
    shared: Arc<Shared>,
    drain_timeout: std::time::Duration,
}

impl BoundRelay {
    pub fn vehicle_addr(&self) -> Result<SocketAddr> {
        Ok(self.vehicle_endpoint.local_addr()?)
    }

    pub fn dispatcher_addr(&self) -> Result<SocketAddr> {
        Ok(self.dispatcher_endpoint.local_addr()?)
    }

    /// Serve both listeners until `shutdown` fires, then drain.
    ///
    /// New connections stop immediately; in-flight ones get
    /// `drain_timeout` to finish before the force token cancels their
    /// pumps. Every spawned task observes one of the two tokens, so this
    /// returns only once the process is quiet.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        let force = CancellationToken::new();

        tracker.spawn(vehicle::listen(
            self.vehicle_endpoint.clone(),
            Arc::clone(&self.shared),
            tracker.clone(),
            shutdown.clone(),
            force.clone(),
        ));
        tracker.spawn(dispatcher::listen(
            self.dispatcher_endpoint.clone(),
            Arc::clone(&self.shared),
            tracker.clone(),
            shutdown.clone(),
            force.clone(),
        ));

        shutdown.cancelled().await;
        info!("Shutdown requested, draining connections");

        tracker.close();
        if tokio::time::timeout(self.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                drain_secs = self.drain_timeout.as_secs(),
                "Drain deadline exceeded, cancelling in-flight connections"
            );
            force.cancel();
            tracker.wait().await;
        }

        self.shared.registry.shutdown();
        self.vehicle_endpoint
            .close(VarInt::from_u32(close_code::DONE), b"shutdown");
        self.dispatcher_endpoint
            .close(VarInt::from_u32(close_code::DONE), b"shutdown");
        self.vehicle_endpoint.wait_idle().await;
        self.dispatcher_endpoint.wait_idle().await;
        info!("Relay stopped");
        Ok(())
    }
}

/// Build the QUIC server config from PEM cert/key files, with datagram
/// support and the relay ALPN.
fn server_config_from_pem(config: &RelayConfig) -> Result<quinn::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(&config.cert_path)
            .with_context(|| format!("opening certificate {}", config.cert_path.display()))?,
    ))
    .collect::<std::io::Result<Vec<_>>>()
    .context("parsing certificate chain")?;
    anyhow::ensure!(!certs.is_empty(), "certificate file contains no certificates");

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(&config.key_path)
            .with_context(|| format!("opening private key {}", config.key_path.display()))?,
    ))
    .context("parsing private key")?
    .context("private key file contains no key")?;

    let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider());

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("assembling TLS config")?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
        .context("TLS config not usable for QUIC")?;
    Ok(quinn::ServerConfig::with_crypto(Arc::new(quic_crypto)))
}
