//! Per-vehicle stream registry
//!
//! The registry is the fan-out point between one producer (the vehicle's
//! ingress connection) and any number of subscribers (dispatcher egress
//! connections). Each live vehicle owns a pair of lanes — video and info —
//! and each subscriber gets its own bounded drop-oldest queue per lane, so
//! a slow dispatcher skips frames instead of stalling the producer or
//! ballooning memory.
//!
//! Guarantees:
//!
//! - at most one producer per vehicle id; a reconnecting vehicle atomically
//!   replaces the old publication, whose sinks observe revocation and whose
//!   subscribers reach end-of-stream
//! - subscribers only see frames published after they subscribed
//! - when the producer releases (or is replaced), every subscriber reaches
//!   end-of-stream after at most its buffered suffix
//!
//! Producer generations are monotonic; a stale release can never evict a
//! newer publication.

mod queue;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use queue::{LaneHub, LossyQueue};

/// The two lanes every vehicle publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Video,
    Info,
}

struct StreamEntry {
    generation: u64,
    video: Arc<LaneHub>,
    info: Arc<LaneHub>,
    /// Cancelled when this entry is replaced or released, so a superseded
    /// producer fails fast.
    revoked: CancellationToken,
}

impl StreamEntry {
    fn close(&self) {
        self.revoked.cancel();
        self.video.close();
        self.info.close();
    }
}

/// Sending half of one lane, owned by the ingress connection.
pub struct FrameSink {
    lane: Lane,
    hub: Arc<LaneHub>,
    revoked: CancellationToken,
}

/// The sink's publication was revoked by a replacing producer or a release.
#[derive(Debug, thiserror::Error)]
#[error("stream sink revoked")]
pub struct SinkRevoked;

impl FrameSink {
    /// Enqueue one frame into every subscriber queue. A full queue drops
    /// its oldest buffered frame; having no subscribers is not an error —
    /// live data with nobody watching simply evaporates.
    pub fn send(&self, frame: Bytes) -> Result<(), SinkRevoked> {
        if self.revoked.is_cancelled() {
            return Err(SinkRevoked);
        }
        if self.hub.broadcast(frame) == 0 {
            debug!(lane = ?self.lane, "no subscribers for frame");
        }
        Ok(())
    }
}

/// Receiving half of one lane, owned by an egress connection.
pub struct FrameSource {
    queue: Arc<LossyQueue>,
}

impl FrameSource {
    /// Next frame, or `None` once the producer is gone and the buffered
    /// suffix is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.queue.pop().await
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.queue.detach();
    }
}

/// Producer-side handle returned by [`StreamRegistry::publish`].
///
/// Holds both sinks plus the revocation token; hand it back to
/// [`StreamRegistry::release`] when the producer ends.
pub struct Publication {
    vehicle_id: u32,
    generation: u64,
    pub video: FrameSink,
    pub info: FrameSink,
    revoked: CancellationToken,
}

impl Publication {
    pub fn vehicle_id(&self) -> u32 {
        self.vehicle_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves when a newer producer replaces this publication (or the
    /// registry shuts down); ingress selects on this to tear down promptly.
    pub async fn revoked(&self) {
        self.revoked.cancelled().await
    }
}

/// Subscriber-side handle returned by [`StreamRegistry::subscribe`].
pub struct Subscription {
    pub video: FrameSource,
    pub info: FrameSource,
}

/// Concurrent map of live vehicle broadcasts.
///
/// One registry per relay process, passed by `Arc` into both listeners —
/// it is deliberately the only state they share.
#[derive(Default)]
pub struct StreamRegistry {
    entries: DashMap<u32, StreamEntry>,
    generations: AtomicU64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the producer for `vehicle_id`, replacing any live entry.
    ///
    /// The replaced entry is closed in the same map operation: its
    /// producer's next send fails, and its subscribers reach end-of-stream
    /// after draining. A concurrent subscriber sees either the old complete
    /// entry or the new one, never a half-built state.
    pub fn publish(&self, vehicle_id: u32) -> Publication {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let video = Arc::new(LaneHub::new());
        let info = Arc::new(LaneHub::new());
        let revoked = CancellationToken::new();

        let entry = StreamEntry {
            generation,
            video: Arc::clone(&video),
            info: Arc::clone(&info),
            revoked: revoked.clone(),
        };
        if let Some(old) = self.entries.insert(vehicle_id, entry) {
            info!(
                vehicle = vehicle_id,
                old_generation = old.generation,
                new_generation = generation,
                "replacing live publication"
            );
            old.close();
        } else {
            info!(vehicle = vehicle_id, generation, "publication started");
        }

        Publication {
            vehicle_id,
            generation,
            video: FrameSink {
                lane: Lane::Video,
                hub: video,
                revoked: revoked.clone(),
            },
            info: FrameSink {
                lane: Lane::Info,
                hub: info,
                revoked: revoked.clone(),
            },
            revoked,
        }
    }

    /// Attach to the live broadcast for `vehicle_id`, or `None` if no
    /// producer is live right now (no waiting, no replay).
    pub fn subscribe(&self, vehicle_id: u32) -> Option<Subscription> {
        let entry = self.entries.get(&vehicle_id)?;
        Some(Subscription {
            video: FrameSource {
                queue: entry.video.attach(),
            },
            info: FrameSource {
                queue: entry.info.attach(),
            },
        })
    }

    /// Whether a producer is currently live for `vehicle_id`.
    pub fn is_live(&self, vehicle_id: u32) -> bool {
        self.entries.contains_key(&vehicle_id)
    }

    /// End a publication. Idempotent in effect: a publication replaced by a
    /// newer generation finds its entry already gone and removes nothing.
    pub fn release(&self, publication: Publication) {
        let removed = self
            .entries
            .remove_if(&publication.vehicle_id, |_, entry| {
                entry.generation == publication.generation
            });
        if let Some((vehicle_id, entry)) = removed {
            entry.close();
            info!(
                vehicle = vehicle_id,
                generation = publication.generation,
                "publication released"
            );
        } else {
            debug!(
                vehicle = publication.vehicle_id,
                generation = publication.generation,
                "stale release ignored (newer publication live)"
            );
        }
    }

    /// Tear down every live entry. Called once by the supervisor after the
    /// listeners have drained.
    pub fn shutdown(&self) {
        for entry in self.entries.iter() {
            entry.close();
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CHANNEL_CAPACITY;
    use std::time::Duration;

    fn frame(tag: usize) -> Bytes {
        Bytes::from(tag.to_be_bytes().to_vec())
    }

    // ========== Publish / replace ==========

    #[tokio::test]
    async fn publish_makes_vehicle_live() {
        let registry = StreamRegistry::new();
        assert!(!registry.is_live(2));
        let publication = registry.publish(2);
        assert!(registry.is_live(2));
        registry.release(publication);
        assert!(!registry.is_live(2));
    }

    #[tokio::test]
    async fn generations_are_monotonic() {
        let registry = StreamRegistry::new();
        let first = registry.publish(1);
        let second = registry.publish(2);
        let third = registry.publish(1);
        assert!(first.generation() < second.generation());
        assert!(second.generation() < third.generation());
    }

    #[tokio::test]
    async fn replacement_revokes_old_sinks() {
        let registry = StreamRegistry::new();
        let old = registry.publish(2);
        assert!(old.video.send(frame(1)).is_ok());

        let new = registry.publish(2);
        assert!(old.video.send(frame(2)).is_err());
        assert!(old.info.send(frame(2)).is_err());
        assert!(new.video.send(frame(3)).is_ok());
    }

    #[tokio::test]
    async fn replacement_signals_revocation_future() {
        let registry = StreamRegistry::new();
        let old = registry.publish(2);
        let _new = registry.publish(2);
        // Must complete immediately, not hang.
        tokio::time::timeout(Duration::from_secs(1), old.revoked())
            .await
            .expect("revocation not observed");
    }

    #[tokio::test]
    async fn stale_release_does_not_evict_new_publication() {
        let registry = StreamRegistry::new();
        let old = registry.publish(2);
        let new = registry.publish(2);
        registry.release(old);
        assert!(registry.is_live(2));
        assert!(new.video.send(frame(1)).is_ok());
    }

    // ========== Subscribe semantics ==========

    #[tokio::test]
    async fn subscribe_without_producer_is_not_live() {
        let registry = StreamRegistry::new();
        assert!(registry.subscribe(42).is_none());
    }

    #[tokio::test]
    async fn frames_flow_to_subscriber() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(2);
        let mut sub = registry.subscribe(2).unwrap();

        publication.video.send(frame(7)).unwrap();
        publication
            .info
            .send(Bytes::from_static(b"{\"speed\":\"0\"}"))
            .unwrap();

        assert_eq!(sub.video.recv().await.unwrap(), frame(7));
        assert_eq!(
            sub.info.recv().await.unwrap(),
            Bytes::from_static(b"{\"speed\":\"0\"}")
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(2);
        let mut first = registry.subscribe(2).unwrap();
        let mut second = registry.subscribe(2).unwrap();

        publication.video.send(frame(9)).unwrap();

        assert_eq!(first.video.recv().await.unwrap(), frame(9));
        assert_eq!(second.video.recv().await.unwrap(), frame(9));
    }

    #[tokio::test]
    async fn no_replay_of_frames_before_subscribe() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(2);
        publication.video.send(frame(1)).unwrap();
        publication.video.send(frame(2)).unwrap();

        let mut sub = registry.subscribe(2).unwrap();
        publication.video.send(frame(3)).unwrap();
        registry.release(publication);

        assert_eq!(sub.video.recv().await.unwrap(), frame(3));
        assert!(sub.video.recv().await.is_none());
    }

    #[tokio::test]
    async fn sending_with_no_subscribers_is_fine() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(2);
        for i in 0..10 {
            publication.video.send(frame(i)).unwrap();
        }
    }

    // ========== Drop-oldest / bounded memory ==========

    #[tokio::test]
    async fn slow_subscriber_skips_oldest_but_stays_live() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(2);
        let mut sub = registry.subscribe(2).unwrap();

        // Overflow the queue threefold; the producer never blocks.
        let total = CHANNEL_CAPACITY * 3;
        for i in 0..total {
            publication.video.send(frame(i)).unwrap();
        }

        // The subscriber sees exactly the newest CHANNEL_CAPACITY frames.
        let first = sub.video.recv().await.unwrap();
        assert_eq!(first, frame(total - CHANNEL_CAPACITY));

        registry.release(publication);
        let mut received = 1;
        while sub.video.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, CHANNEL_CAPACITY);
    }

    // ========== Cleanup / end-of-stream ==========

    #[tokio::test]
    async fn release_delivers_end_of_stream_after_buffered_suffix() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(2);
        let mut sub = registry.subscribe(2).unwrap();

        publication.video.send(frame(1)).unwrap();
        publication.video.send(frame(2)).unwrap();
        registry.release(publication);

        assert_eq!(sub.video.recv().await.unwrap(), frame(1));
        assert_eq!(sub.video.recv().await.unwrap(), frame(2));
        assert!(sub.video.recv().await.is_none());
        assert!(sub.info.recv().await.is_none());
    }

    #[tokio::test]
    async fn replacement_ends_old_subscribers_immediately() {
        let registry = StreamRegistry::new();
        let _old = registry.publish(2);
        let mut old_sub = registry.subscribe(2).unwrap();

        // Replacement alone closes the old subscribers, even while the old
        // producer connection is still winding down.
        let new = registry.publish(2);
        assert!(old_sub.video.recv().await.is_none());

        // A subscriber attaching after the replacement sees the new frames.
        let mut new_sub = registry.subscribe(2).unwrap();
        new.video.send(frame(5)).unwrap();
        assert_eq!(new_sub.video.recv().await.unwrap(), frame(5));
        registry.release(new);
    }

    #[tokio::test]
    async fn shutdown_clears_everything() {
        let registry = StreamRegistry::new();
        let publication = registry.publish(1);
        let _other = registry.publish(2);
        let mut sub = registry.subscribe(1).unwrap();

        registry.shutdown();
        assert!(!registry.is_live(1));
        assert!(!registry.is_live(2));
        assert!(publication.video.send(frame(0)).is_err());
        assert!(sub.video.recv().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_publish_subscribe_release() {
        let registry = Arc::new(StreamRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let publication = registry.publish(7);
                    if let Some(mut sub) = registry.subscribe(7) {
                        let _ = publication.video.send(frame(1));
                        // Either a frame or end-of-stream; never a hang.
                        let _ = tokio::time::timeout(
                            Duration::from_millis(50),
                            sub.video.recv(),
                        )
                        .await;
                    }
                    registry.release(publication);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
