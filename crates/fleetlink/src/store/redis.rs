//! Redis adapter for the credential store
//!
//! Records are MessagePack-encoded under `vehicle:{id}` / `dispatcher:{id}`;
//! ids come from the `vehicle:id` / `dispatcher:id` counters via `INCR`.
//! Every operation runs under the [`STORE_DEADLINE`]; a slow store surfaces
//! as [`StoreError::Internal`] and the caller closes the connection.
//!
//! Writes watch the record key and apply the `SET` in a MULTI/EXEC pipeline.
//! Redis has no unique-key constraint, so the `EXISTS` check under WATCH is
//! what catches a counter that got out of sync with the records. Only the
//! admin plane writes, so contention on these keys is rare.

use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{DispatcherStore, StoreError, VehicleStore, STORE_DEADLINE};
use crate::entity::{Dispatcher, GrantsType, Vehicle};

const VEHICLE_COUNTER: &str = "vehicle:id";
const DISPATCHER_COUNTER: &str = "dispatcher:id";

fn vehicle_key(id: u32) -> String {
    format!("vehicle:{id}")
}

fn dispatcher_key(id: u32) -> String {
    format!("dispatcher:{id}")
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec_named(record).map_err(|e| StoreError::Internal(e.to_string()))
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    rmp_serde::from_slice(data).map_err(|e| StoreError::Internal(e.to_string()))
}

fn store_err(err: redis::RedisError) -> StoreError {
    StoreError::Internal(err.to_string())
}

async fn with_deadline<T>(
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(STORE_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Internal("kv store deadline exceeded".into())),
    }
}

/// `INCR` the id counter, refusing ids that would not fit the 32-bit wire
/// representation.
async fn next_id(con: &mut MultiplexedConnection, counter: &str) -> Result<u32, StoreError> {
    let id: u64 = con.incr(counter, 1u32).await.map_err(store_err)?;
    u32::try_from(id).map_err(|_| StoreError::Internal("id counter exceeded u32".into()))
}

/// Store `payload` under `key` inside WATCH/MULTI/EXEC, failing if a record
/// is already there.
async fn insert_fresh(
    con: &mut MultiplexedConnection,
    key: &str,
    payload: Vec<u8>,
) -> Result<(), StoreError> {
    let _: () = redis::cmd("WATCH")
        .arg(key)
        .query_async(con)
        .await
        .map_err(store_err)?;
    let exists: bool = con.exists(key).await.map_err(store_err)?;
    if exists {
        let _: () = redis::cmd("UNWATCH")
            .query_async(con)
            .await
            .map_err(store_err)?;
        return Err(StoreError::AlreadyExists);
    }

    let mut pipe = redis::pipe();
    pipe.atomic().set(key, payload).ignore();
    let _: () = pipe.query_async(con).await.map_err(store_err)?;
    Ok(())
}

/// Overwrite the record under `key` inside WATCH/MULTI/EXEC, failing if it
/// does not exist.
async fn overwrite(
    con: &mut MultiplexedConnection,
    key: &str,
    payload: Vec<u8>,
) -> Result<(), StoreError> {
    let _: () = redis::cmd("WATCH")
        .arg(key)
        .query_async(con)
        .await
        .map_err(store_err)?;
    let exists: bool = con.exists(key).await.map_err(store_err)?;
    if !exists {
        let _: () = redis::cmd("UNWATCH")
            .query_async(con)
            .await
            .map_err(store_err)?;
        return Err(StoreError::NotFound);
    }

    let mut pipe = redis::pipe();
    pipe.atomic().set(key, payload).ignore();
    let _: () = pipe.query_async(con).await.map_err(store_err)?;
    Ok(())
}

/// Credential store backed by Redis.
///
/// Reads share one multiplexed [`ConnectionManager`]; each write takes a
/// dedicated connection because WATCH is connection-scoped.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the store answers a PING within the deadline.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(store_err)?;
        let manager = with_deadline(async {
            ConnectionManager::new(client.clone())
                .await
                .map_err(store_err)
        })
        .await?;

        let mut con = manager.clone();
        let pong: String = with_deadline(async move {
            redis::cmd("PING")
                .query_async(&mut con)
                .await
                .map_err(store_err)
        })
        .await?;
        debug!(url, pong, "credential store connected");

        Ok(Self { client, manager })
    }

    async fn fetch<T: DeserializeOwned>(&self, key: String) -> Result<T, StoreError> {
        let mut con = self.manager.clone();
        let data: Option<Vec<u8>> =
            with_deadline(async move { con.get(&key).await.map_err(store_err) }).await?;
        let data = data.ok_or(StoreError::NotFound)?;
        decode(&data)
    }

    async fn remove(&self, key: String) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        with_deadline(async move {
            // DEL of an absent key deletes zero records; same end state.
            let _: u64 = con.del(&key).await.map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn write_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)
    }
}

#[async_trait]
impl VehicleStore for RedisStore {
    async fn get_vehicle(&self, id: u32) -> Result<Vehicle, StoreError> {
        self.fetch(vehicle_key(id)).await
    }

    async fn add_vehicle(&self, password_hash: String) -> Result<Vehicle, StoreError> {
        with_deadline(async {
            let mut con = self.write_connection().await?;
            let id = next_id(&mut con, VEHICLE_COUNTER).await?;
            let vehicle = Vehicle { id, password_hash };
            insert_fresh(&mut con, &vehicle_key(id), encode(&vehicle)?).await?;
            Ok(vehicle)
        })
        .await
    }

    async fn delete_vehicle(&self, id: u32) -> Result<(), StoreError> {
        self.remove(vehicle_key(id)).await
    }
}

#[async_trait]
impl DispatcherStore for RedisStore {
    async fn get_dispatcher(&self, id: u32) -> Result<Dispatcher, StoreError> {
        self.fetch(dispatcher_key(id)).await
    }

    async fn add_dispatcher(
        &self,
        password_hash: String,
        grants_type: GrantsType,
        grants: BTreeSet<u32>,
    ) -> Result<Dispatcher, StoreError> {
        with_deadline(async {
            let mut con = self.write_connection().await?;
            let id = next_id(&mut con, DISPATCHER_COUNTER).await?;
            let dispatcher = Dispatcher {
                id,
                password_hash,
                grants_type,
                grants,
            };
            insert_fresh(&mut con, &dispatcher_key(id), encode(&dispatcher)?).await?;
            Ok(dispatcher)
        })
        .await
    }

    async fn update_dispatcher(&self, dispatcher: &Dispatcher) -> Result<(), StoreError> {
        let payload = encode(dispatcher)?;
        let key = dispatcher_key(dispatcher.id);
        with_deadline(async {
            let mut con = self.write_connection().await?;
            overwrite(&mut con, &key, payload).await
        })
        .await
    }

    async fn delete_dispatcher(&self, id: u32) -> Result<(), StoreError> {
        self.remove(dispatcher_key(id)).await
    }
}
