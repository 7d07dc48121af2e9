//! Vehicle-facing ingress
//!
//! Per connection: accept the two inbound streams (info first, then video),
//! wait for the handshake datagram, authenticate against the credential
//! store, publish into the registry, then pump both lanes until something
//! ends. Whatever happens, the publication is released exactly once.
//!
//! Connection lifecycle: connect → streams → handshake → authenticate →
//! publish → drain → closed; any error jumps straight to closed with the
//! matching close code.

use std::sync::Arc;

use quinn::{Connection, Endpoint, RecvStream, VarInt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::Shared;
use crate::error::{close_code, RelayError};
use crate::framing::JsonAssembler;
use crate::password;
use crate::protocol::{VehicleHello, MAX_VIDEO_CHUNK};
use crate::registry::{FrameSink, Publication};

/// Accept vehicle connections until shutdown.
pub(crate) async fn listen(
    endpoint: Endpoint,
    shared: Arc<Shared>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    force: CancellationToken,
) {
    match endpoint.local_addr() {
        Ok(addr) => info!(%addr, "Vehicle listener ready"),
        Err(_) => info!("Vehicle listener ready"),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else { break };
                let shared = Arc::clone(&shared);
                let force = force.clone();
                tracker.spawn(async move {
                    let connection = match incoming.await {
                        Ok(connection) => connection,
                        Err(err) => {
                            debug!(error = %err, "Vehicle connection failed during handshake");
                            return;
                        }
                    };
                    let remote = connection.remote_address();
                    info!(%remote, "Vehicle connected");

                    match handle_connection(&connection, &shared, &force).await {
                        Ok(()) => {
                            connection.close(VarInt::from_u32(close_code::DONE), b"closed");
                        }
                        Err(err) => {
                            match &err {
                                RelayError::PeerGone(reason) => {
                                    info!(%remote, reason = %reason, "Vehicle connection ended")
                                }
                                other => warn!(%remote, error = %other, "Vehicle connection rejected"),
                            }
                            connection.close(err.close_code(), err.close_reason());
                        }
                    }
                    info!(%remote, "Vehicle connection closed");
                });
            }
        }
    }
    info!("Vehicle listener stopped");
}

async fn handle_connection(
    connection: &Connection,
    shared: &Shared,
    force: &CancellationToken,
) -> Result<(), RelayError> {
    // Everything before publish can block on a peer that never follows
    // through, so the whole setup phase answers the force token too.
    let (info_recv, video_recv, vehicle_id) = tokio::select! {
        result = attach(connection, shared) => result?,
        _ = force.cancelled() => {
            return Err(RelayError::PeerGone("relay shutting down".into()));
        }
    };

    let publication = shared.registry.publish(vehicle_id);
    let result = pump_lanes(&publication, info_recv, video_recv, force).await;
    shared.registry.release(publication);
    result
}

/// Accept the streams, read the handshake, and authenticate.
async fn attach(
    connection: &Connection,
    shared: &Shared,
) -> Result<(RecvStream, RecvStream, u32), RelayError> {
    // The vehicle opens its streams in a fixed order: info, then video.
    let (_info_reply, info_recv) = connection.accept_bi().await?;
    let (_video_reply, video_recv) = connection.accept_bi().await?;

    let datagram = connection.read_datagram().await?;
    let hello = VehicleHello::parse(&datagram)?;

    let vehicle = shared.vehicles.get_vehicle(hello.vehicle_id).await?;
    if !password::verify(&hello.password, &vehicle.password_hash) {
        return Err(RelayError::Unauthorized);
    }
    info!(vehicle = hello.vehicle_id, "Vehicle authenticated");
    Ok((info_recv, video_recv, hello.vehicle_id))
}

/// Run both lane pumps; the first to finish (or a revocation/cancellation)
/// tears the other down with it.
async fn pump_lanes(
    publication: &Publication,
    info_recv: RecvStream,
    video_recv: RecvStream,
    force: &CancellationToken,
) -> Result<(), RelayError> {
    tokio::select! {
        result = pump_info(info_recv, &publication.info) => result,
        result = pump_video(video_recv, &publication.video) => result,
        _ = publication.revoked() => {
            Err(RelayError::PeerGone("superseded by a newer publication".into()))
        }
        _ = force.cancelled() => {
            Err(RelayError::PeerGone("relay shutting down".into()))
        }
    }
}

/// Info lane: reassemble the byte stream into complete JSON objects and
/// forward each as one frame.
async fn pump_info(mut recv: RecvStream, sink: &FrameSink) -> Result<(), RelayError> {
    let mut assembler = JsonAssembler::new();
    loop {
        let Some(chunk) = recv.read_chunk(MAX_VIDEO_CHUNK, true).await? else {
            return Err(RelayError::PeerGone("info stream ended".into()));
        };
        let frames = assembler
            .push(&chunk.bytes)
            .map_err(|err| RelayError::BadRequest(err.to_string()))?;
        for frame in frames {
            if sink.send(frame).is_err() {
                return Err(RelayError::PeerGone("publication revoked".into()));
            }
        }
    }
}

/// Video lane: verbatim passthrough in bounded chunks, no framing.
async fn pump_video(mut recv: RecvStream, sink: &FrameSink) -> Result<(), RelayError> {
    loop {
        let Some(chunk) = recv.read_chunk(MAX_VIDEO_CHUNK, true).await? else {
            return Err(RelayError::PeerGone("video stream ended".into()));
        };
        if sink.send(chunk.bytes).is_err() {
            return Err(RelayError::PeerGone("publication revoked".into()));
        }
    }
}
