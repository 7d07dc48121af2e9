//! Credential store
//!
//! Vehicle and dispatcher records live in an external Redis-compatible KV
//! store. Both QUIC listeners read from it at attach time; only the admin
//! plane writes. The traits are the seam: the relay engine and the admin
//! handlers depend on them, the [`redis`](crate::store::redis::RedisStore)
//! adapter implements them against the real store, and
//! [`memory`](crate::store::memory::MemoryStore) backs tests and local
//! development.

pub mod memory;
pub mod redis;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::entity::{Dispatcher, GrantsType, Vehicle};

/// Store operation deadline. A KV store that takes longer than this is
/// treated as down.
pub const STORE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(1);

/// Credential store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    AlreadyExists,

    #[error("store error: {0}")]
    Internal(String),
}

/// Read/write access to vehicle records.
#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Fetch the record for `id`.
    async fn get_vehicle(&self, id: u32) -> Result<Vehicle, StoreError>;

    /// Allocate the next vehicle id and persist a record with the given
    /// password hash.
    async fn add_vehicle(&self, password_hash: String) -> Result<Vehicle, StoreError>;

    /// Remove the record for `id`. Removing an absent record is not an
    /// error — the end state is the same.
    async fn delete_vehicle(&self, id: u32) -> Result<(), StoreError>;
}

/// Read/write access to dispatcher records.
#[async_trait]
pub trait DispatcherStore: Send + Sync {
    /// Fetch the record for `id`.
    async fn get_dispatcher(&self, id: u32) -> Result<Dispatcher, StoreError>;

    /// Allocate the next dispatcher id and persist a record.
    async fn add_dispatcher(
        &self,
        password_hash: String,
        grants_type: GrantsType,
        grants: BTreeSet<u32>,
    ) -> Result<Dispatcher, StoreError>;

    /// Overwrite the record for an existing dispatcher.
    async fn update_dispatcher(&self, dispatcher: &Dispatcher) -> Result<(), StoreError>;

    /// Remove the record for `id`. Idempotent, like vehicle deletion.
    async fn delete_dispatcher(&self, id: u32) -> Result<(), StoreError>;
}
