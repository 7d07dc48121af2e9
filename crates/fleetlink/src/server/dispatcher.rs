//! Dispatcher-facing egress
//!
//! Per connection: open the two outbound streams (info first, then video),
//! wait for the handshake datagram, authenticate and authorize against the
//! credential store, subscribe in the registry, then forward frames until
//! the broadcast ends or the dispatcher goes away.
//!
//! Authorization is evaluated once at attach. Revoking a grant later does
//! not preempt a session already in flight; the dispatcher keeps its feed
//! until it disconnects.

use std::sync::Arc;

use quinn::{Connection, Endpoint, SendStream, VarInt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::Shared;
use crate::error::{close_code, RelayError};
use crate::password;
use crate::protocol::DispatcherHello;
use crate::registry::{FrameSource, Subscription};

/// Accept dispatcher connections until shutdown.
pub(crate) async fn listen(
    endpoint: Endpoint,
    shared: Arc<Shared>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    force: CancellationToken,
) {
    match endpoint.local_addr() {
        Ok(addr) => info!(%addr, "Dispatcher listener ready"),
        Err(_) => info!("Dispatcher listener ready"),
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
                            debug!(error = %err, "Dispatcher connection failed during handshake");
                            return;
                        }
                    };
                    let remote = connection.remote_address();
                    info!(%remote, "Dispatcher connected");

                    match handle_connection(&connection, &shared, &force).await {
                        Ok(()) => {
                            connection.close(VarInt::from_u32(close_code::DONE), b"closed");
                        }
                        Err(err) => {
                            match &err {
                                RelayError::PeerGone(reason) => {
                                    info!(%remote, reason = %reason, "Dispatcher connection ended")
                                }
                                other => warn!(%remote, error = %other, "Dispatcher connection rejected"),
                            }
                            connection.close(err.close_code(), err.close_reason());
                        }
                    }
                    info!(%remote, "Dispatcher connection closed");
                });
            }
        }
    }
    info!("Dispatcher listener stopped");
}

async fn handle_connection(
    connection: &Connection,
    shared: &Shared,
    force: &CancellationToken,
) -> Result<(), RelayError> {
    // The handshake datagram may never arrive; the setup phase answers the
    // force token so a silent peer cannot outlive the drain window.
    let (subscription, info_send, video_send) = tokio::select! {
        result = attach(connection, shared) => result?,
        _ = force.cancelled() => {
            return Err(RelayError::PeerGone("relay shutting down".into()));
        }
    };

    pump_lanes(subscription, info_send, video_send, force).await
}

/// Open the streams, read the handshake, authenticate, authorize, and
/// subscribe.
async fn attach(
    connection: &Connection,
    shared: &Shared,
) -> Result<(Subscription, SendStream, SendStream), RelayError> {
    // Streams toward the dispatcher, in a fixed order: info, then video.
    let (info_send, _info_back) = connection.open_bi().await?;
    let (video_send, _video_back) = connection.open_bi().await?;

    let datagram = connection.read_datagram().await?;
    let hello = DispatcherHello::parse(&datagram)?;

    let dispatcher = shared.dispatchers.get_dispatcher(hello.dispatcher_id).await?;
    if !password::verify(&hello.password, &dispatcher.password_hash) {
        return Err(RelayError::Unauthorized);
    }
    if !dispatcher.may_observe(hello.vehicle_id) {
        return Err(RelayError::Forbidden);
    }

    let subscription = shared
        .registry
        .subscribe(hello.vehicle_id)
        .ok_or(RelayError::NotFound)?;
    info!(
        dispatcher = hello.dispatcher_id,
        vehicle = hello.vehicle_id,
        "Dispatcher subscribed"
    );
    Ok((subscription, info_send, video_send))
}

/// Forward both lanes; end-of-stream on either one, a write error, or
/// cancellation tears the whole connection down.
async fn pump_lanes(
    mut subscription: Subscription,
    mut info_send: SendStream,
    mut video_send: SendStream,
    force: &CancellationToken,
) -> Result<(), RelayError> {
    tokio::select! {
        result = forward(&mut subscription.info, &mut info_send) => result,
        result = forward(&mut subscription.video, &mut video_send) => result,
        _ = force.cancelled() => {
            Err(RelayError::PeerGone("relay shutting down".into()))
        }
    }
}

/// Drain one source into one stream. The broadcast ending is an orderly
/// finish for the dispatcher, not an error.
async fn forward(source: &mut FrameSource, stream: &mut SendStream) -> Result<(), RelayError> {
    while let Some(frame) = source.recv().await {
        stream.write_all(&frame).await?;
    }
    let _ = stream.finish();
    Ok(())
}
