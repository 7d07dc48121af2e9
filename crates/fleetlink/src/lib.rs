//! Fleetlink — live telemetry and video relay for autonomous vehicle fleets
//!
//! Vehicles push two real-time streams over QUIC (an H.264 video feed and a
//! JSON telemetry feed); authenticated dispatchers subscribe over QUIC and
//! receive the live feeds of the vehicles they are authorized to monitor.
//! The relay never originates data and never records it: frames that nobody
//! is fast enough to read are dropped, oldest first.
//!
//! Module layout:
//!
//! - [`protocol`]: wire constants and handshake datagram encoding
//! - [`registry`]: per-vehicle fan-out point between producers and subscribers
//! - [`framing`]: JSON reassembly for the telemetry path
//! - [`server`]: QUIC listeners (vehicle ingress, dispatcher egress) and the
//!   supervisor that drains them on shutdown
//! - [`store`]: credential records in an external Redis-compatible KV store
//! - [`admin`]: HTTP provisioning surface for vehicles and dispatchers
//! - [`password`]: bcrypt verification of stored secrets

pub mod admin;
pub mod config;
pub mod entity;
pub mod error;
pub mod framing;
pub mod password;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;

pub use config::{AdminConfig, RelayConfig};
pub use entity::{Dispatcher, GrantsType, Vehicle};
pub use error::RelayError;
pub use registry::StreamRegistry;
pub use server::RelayServer;
