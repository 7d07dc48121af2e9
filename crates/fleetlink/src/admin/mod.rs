//! Admin provisioning API
//!
//! CRUD over vehicles and dispatchers, gated by the `X-Secret` header.
//! This is the only writer of the credential store; the relay listeners
//! never see this surface.
//!
//! Routes:
//!
//! - `GET    /admin/vehicle/:id`
//! - `POST   /admin/vehicle`
//! - `DELETE /admin/vehicle/:id`
//! - `GET    /admin/dispatcher/:id`
//! - `POST   /admin/dispatcher`
//! - `PUT    /admin/dispatcher`
//! - `DELETE /admin/dispatcher/:id`

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::entity::{normalize_grants, Dispatcher, GrantsType};
use crate::password;
use crate::store::{DispatcherStore, StoreError, VehicleStore};

/// Shared state behind the admin router.
#[derive(Clone)]
pub struct AdminState {
    vehicles: Arc<dyn VehicleStore>,
    dispatchers: Arc<dyn DispatcherStore>,
    secret_key: Arc<str>,
}

impl AdminState {
    pub fn new(
        vehicles: Arc<dyn VehicleStore>,
        dispatchers: Arc<dyn DispatcherStore>,
        secret_key: String,
    ) -> Self {
        Self {
            vehicles,
            dispatchers,
            secret_key: secret_key.into(),
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), AdminError> {
        let presented = headers
            .get("X-Secret")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if presented != &*self.secret_key {
            return Err(AdminError::AccessDenied);
        }
        Ok(())
    }
}

/// Admin-plane failure, rendered as `{"error": ...}` with the matching
/// status code.
#[derive(Debug, thiserror::Error)]
enum AdminError {
    #[error("access denied")]
    AccessDenied,
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("already exists")]
    AlreadyExists,
    #[error("internal error")]
    Internal(String),
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AdminError::NotFound,
            StoreError::AlreadyExists => AdminError::AlreadyExists,
            StoreError::Internal(msg) => AdminError::Internal(msg),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::AccessDenied => StatusCode::FORBIDDEN,
            AdminError::NotFound => StatusCode::NOT_FOUND,
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::AlreadyExists => StatusCode::CONFLICT,
            AdminError::Internal(detail) => {
                error!(detail = %detail, "Admin request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// ========== Request / response bodies ==========

#[derive(Debug, Deserialize)]
pub struct AddVehicleRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: u32,
}

#[derive(Debug, Serialize)]
pub struct GetVehicleResponse {
    pub id: u32,
}

#[derive(Debug, Deserialize)]
pub struct AddDispatcherRequest {
    pub password: String,
    pub grants_type: GrantsType,
    #[serde(default)]
    pub grants: Option<BTreeSet<u32>>,
}

#[derive(Debug, Deserialize)]
pub struct EditDispatcherRequest {
    pub id: u32,
    pub grants_type: GrantsType,
    #[serde(default)]
    pub grants: Option<BTreeSet<u32>>,
}

#[derive(Debug, Serialize)]
pub struct GetDispatcherResponse {
    pub id: u32,
    pub grants_type: GrantsType,
    pub grants: BTreeSet<u32>,
}

// ========== Router ==========

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/vehicle", post(add_vehicle))
        .route("/admin/vehicle/:id", get(get_vehicle).delete(delete_vehicle))
        .route("/admin/dispatcher", post(add_dispatcher).put(edit_dispatcher))
        .route(
            "/admin/dispatcher/:id",
            get(get_dispatcher).delete(delete_dispatcher),
        )
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listen: SocketAddr,
    state: AdminState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding admin listener {listen}"))?;
    info!(addr = %listener.local_addr()?, "Admin API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("admin server exited")
}

// ========== Vehicle handlers ==========

async fn get_vehicle(
    State(state): State<AdminState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Result<Json<GetVehicleResponse>, AdminError> {
    state.authorize(&headers)?;
    let vehicle = state.vehicles.get_vehicle(id).await?;
    Ok(Json(GetVehicleResponse { id: vehicle.id }))
}

async fn add_vehicle(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(request): Json<AddVehicleRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AdminError> {
    state.authorize(&headers)?;
    let hash = password::hash(&request.password)
        .map_err(|err| AdminError::BadRequest(format!("failed to hash password: {err}")))?;
    let vehicle = state.vehicles.add_vehicle(hash).await?;
    info!(vehicle = vehicle.id, "Vehicle provisioned");
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: vehicle.id })))
}

async fn delete_vehicle(
    State(state): State<AdminState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Result<StatusCode, AdminError> {
    state.authorize(&headers)?;
    state.vehicles.delete_vehicle(id).await?;
    info!(vehicle = id, "Vehicle deleted");
    Ok(StatusCode::OK)
}

// ========== Dispatcher handlers ==========

async fn get_dispatcher(
    State(state): State<AdminState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Result<Json<GetDispatcherResponse>, AdminError> {
    state.authorize(&headers)?;
    let dispatcher = state.dispatchers.get_dispatcher(id).await?;
    Ok(Json(GetDispatcherResponse {
        id: dispatcher.id,
        grants_type: dispatcher.grants_type,
        grants: dispatcher.grants,
    }))
}

async fn add_dispatcher(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(request): Json<AddDispatcherRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AdminError> {
    state.authorize(&headers)?;
    let grants = normalize_grants(request.grants_type, request.grants)
        .map_err(|err| AdminError::BadRequest(err.to_string()))?;
    let hash = password::hash(&request.password)
        .map_err(|err| AdminError::BadRequest(format!("failed to hash password: {err}")))?;
    let dispatcher = state
        .dispatchers
        .add_dispatcher(hash, request.grants_type, grants)
        .await?;
    info!(dispatcher = dispatcher.id, "Dispatcher provisioned");
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse { id: dispatcher.id }),
    ))
}

async fn edit_dispatcher(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(request): Json<EditDispatcherRequest>,
) -> Result<StatusCode, AdminError> {
    state.authorize(&headers)?;
    let grants = normalize_grants(request.grants_type, request.grants)
        .map_err(|err| AdminError::BadRequest(err.to_string()))?;

    let current = state.dispatchers.get_dispatcher(request.id).await?;
    let updated = Dispatcher {
        id: current.id,
        password_hash: current.password_hash,
        grants_type: request.grants_type,
        grants,
    };
    state.dispatchers.update_dispatcher(&updated).await?;
    info!(dispatcher = request.id, "Dispatcher grants updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_dispatcher(
    State(state): State<AdminState>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Result<StatusCode, AdminError> {
    state.authorize(&headers)?;
    state.dispatchers.delete_dispatcher(id).await?;
    info!(dispatcher = id, "Dispatcher deleted");
    Ok(StatusCode::OK)
}
