//! In-memory credential store
//!
//! Backs the test suites and local development without a Redis instance.
//! Semantics mirror the Redis adapter: dense ids from an atomic counter,
//! idempotent deletes, `NotFound` on updates of absent records.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DispatcherStore, StoreError, VehicleStore};
use crate::entity::{Dispatcher, GrantsType, Vehicle};

#[derive(Default)]
pub struct MemoryStore {
    vehicles: RwLock<HashMap<u32, Vehicle>>,
    dispatchers: RwLock<HashMap<u32, Dispatcher>>,
    next_vehicle_id: AtomicU32,
    next_dispatcher_id: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vehicle with a fixed id, for seeding test fixtures.
    pub fn seed_vehicle(&self, vehicle: Vehicle) {
        self.next_vehicle_id
            .fetch_max(vehicle.id, Ordering::Relaxed);
        self.vehicles.write().insert(vehicle.id, vehicle);
    }

    /// Insert a dispatcher with a fixed id, for seeding test fixtures.
    pub fn seed_dispatcher(&self, dispatcher: Dispatcher) {
        self.next_dispatcher_id
            .fetch_max(dispatcher.id, Ordering::Relaxed);
        self.dispatchers.write().insert(dispatcher.id, dispatcher);
    }
}

#[async_trait]
impl VehicleStore for MemoryStore {
    async fn get_vehicle(&self, id: u32) -> Result<Vehicle, StoreError> {
        self.vehicles
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn add_vehicle(&self, password_hash: String) -> Result<Vehicle, StoreError> {
        let id = self.next_vehicle_id.fetch_add(1, Ordering::Relaxed) + 1;
        let vehicle = Vehicle { id, password_hash };
        let mut vehicles = self.vehicles.write();
        if vehicles.contains_key(&id) {
            return Err(StoreError::AlreadyExists);
        }
        vehicles.insert(id, vehicle.clone());
        Ok(vehicle)
    }

    async fn delete_vehicle(&self, id: u32) -> Result<(), StoreError> {
        self.vehicles.write().remove(&id);
        Ok(())
    }
}

#[async_trait]
impl DispatcherStore for MemoryStore {
    async fn get_dispatcher(&self, id: u32) -> Result<Dispatcher, StoreError> {
        self.dispatchers
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn add_dispatcher(
        &self,
        password_hash: String,
        grants_type: GrantsType,
        grants: BTreeSet<u32>,
    ) -> Result<Dispatcher, StoreError> {
        let id = self.next_dispatcher_id.fetch_add(1, Ordering::Relaxed) + 1;
        let dispatcher = Dispatcher {
            id,
            password_hash,
            grants_type,
            grants,
        };
        let mut dispatchers = self.dispatchers.write();
        if dispatchers.contains_key(&id) {
            return Err(StoreError::AlreadyExists);
        }
        dispatchers.insert(id, dispatcher.clone());
        Ok(dispatcher)
    }

    async fn update_dispatcher(&self, dispatcher: &Dispatcher) -> Result<(), StoreError> {
        let mut dispatchers = self.dispatchers.write();
        match dispatchers.get_mut(&dispatcher.id) {
            Some(slot) => {
                *slot = dispatcher.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete_dispatcher(&self, id: u32) -> Result<(), StoreError> {
        self.dispatchers.write().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_dense_from_one() {
        let store = MemoryStore::new();
        let a = store.add_vehicle("h1".into()).await.unwrap();
        let b = store.add_vehicle("h2".into()).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn get_missing_vehicle_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_vehicle(9).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let vehicle = store.add_vehicle("h".into()).await.unwrap();
        store.delete_vehicle(vehicle.id).await.unwrap();
        store.delete_vehicle(vehicle.id).await.unwrap();
        assert!(store.get_vehicle(vehicle.id).await.is_err());
    }

    #[tokio::test]
    async fn update_missing_dispatcher_is_not_found() {
        let store = MemoryStore::new();
        let ghost = Dispatcher {
            id: 44,
            password_hash: String::new(),
            grants_type: GrantsType::All,
            grants: BTreeSet::new(),
        };
        assert!(matches!(
            store.update_dispatcher(&ghost).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn seeding_reserves_the_id_space() {
        let store = MemoryStore::new();
        store.seed_vehicle(Vehicle {
            id: 10,
            password_hash: "h".into(),
        });
        let next = store.add_vehicle("h2".into()).await.unwrap();
        assert_eq!(next.id, 11);
    }

    #[tokio::test]
    async fn update_replaces_grants() {
        let store = MemoryStore::new();
        let mut dispatcher = store
            .add_dispatcher("h".into(), GrantsType::All, BTreeSet::new())
            .await
            .unwrap();
        dispatcher.grants_type = GrantsType::List;
        dispatcher.grants = [3].into();
        store.update_dispatcher(&dispatcher).await.unwrap();

        let back = store.get_dispatcher(dispatcher.id).await.unwrap();
        assert_eq!(back.grants_type, GrantsType::List);
        assert_eq!(back.grants, [3].into());
    }
}
