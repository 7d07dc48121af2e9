//! Lossy bounded frame queues and the per-lane fan-out hub
//!
//! Every subscriber owns one [`LossyQueue`]: FIFO, bounded at
//! [`CHANNEL_CAPACITY`] frames, drop-oldest on overflow. The producer never
//! blocks and never buffers more than the bound per subscriber; a slow
//! dispatcher loses its own oldest frames without affecting anyone else.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::protocol::CHANNEL_CAPACITY;

struct QueueState {
    frames: VecDeque<Bytes>,
    closed: bool,
    dropped: u64,
}

/// A single-consumer bounded queue with drop-oldest overflow.
pub(crate) struct LossyQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Set when the consumer is gone; the hub prunes detached queues on the
    /// next broadcast.
    detached: AtomicBool,
}

impl LossyQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(CHANNEL_CAPACITY),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            detached: AtomicBool::new(false),
        }
    }

    /// Enqueue a frame, discarding the oldest one if the queue is full.
    /// No-op once closed.
    pub(crate) fn push(&self, frame: Bytes) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.frames.len() >= CHANNEL_CAPACITY {
                state.frames.pop_front();
                state.dropped += 1;
                trace!(dropped = state.dropped, "queue full, oldest frame dropped");
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Mark end-of-stream. Buffered frames remain poppable; `pop` returns
    /// `None` once they are drained.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Next frame, or `None` after close once the buffer is drained.
    pub(crate) async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one stores a permit when nobody is waiting yet, so a
            // push racing this gap cannot be lost.
            self.notify.notified().await;
        }
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

/// Fan-out point for one lane of one vehicle: duplicates every produced
/// frame into each live subscriber queue.
#[derive(Default)]
pub(crate) struct LaneHub {
    subscribers: Mutex<Vec<Arc<LossyQueue>>>,
    /// Set under the subscriber lock; an attach racing a close still gets a
    /// queue that terminates instead of one that waits forever.
    closed: AtomicBool,
}

impl LaneHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach a fresh subscriber queue. The queue starts empty, so the new
    /// subscriber only ever observes frames broadcast after this call.
    pub(crate) fn attach(&self) -> Arc<LossyQueue> {
        let queue = Arc::new(LossyQueue::new());
        let mut subscribers = self.subscribers.lock();
        if self.closed.load(Ordering::Relaxed) {
            queue.close();
        } else {
            subscribers.push(Arc::clone(&queue));
        }
        queue
    }

    /// Duplicate `frame` into every live subscriber queue, pruning detached
    /// ones. Returns how many subscribers received it.
    pub(crate) fn broadcast(&self, frame: Bytes) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|queue| !queue.is_detached());
        for queue in subscribers.iter() {
            queue.push(frame.clone());
        }
        subscribers.len()
    }

    /// Close every subscriber queue; each consumer reaches end-of-stream
    /// after draining its buffered suffix.
    pub(crate) fn close(&self) {
        let subscribers = self.subscribers.lock();
        self.closed.store(true, Ordering::Relaxed);
        for queue in subscribers.iter() {
            queue.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(tag: usize) -> Bytes {
        Bytes::from(tag.to_be_bytes().to_vec())
    }

    // ========== LossyQueue ==========

    #[tokio::test]
    async fn fifo_order_preserved() {
        let queue = LossyQueue::new();
        queue.push(frame(1));
        queue.push(frame(2));
        queue.push(frame(3));
        assert_eq!(queue.pop().await.unwrap(), frame(1));
        assert_eq!(queue.pop().await.unwrap(), frame(2));
        assert_eq!(queue.pop().await.unwrap(), frame(3));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_respects_bound() {
        let queue = LossyQueue::new();
        let total = CHANNEL_CAPACITY + 50;
        for i in 0..total {
            queue.push(frame(i));
        }
        assert_eq!(queue.len(), CHANNEL_CAPACITY);
        assert_eq!(queue.dropped(), 50);
        // Head is the oldest retained frame.
        assert_eq!(queue.pop().await.unwrap(), frame(50));
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(LossyQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(frame(9));
        let got = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap(), frame(9));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = LossyQueue::new();
        queue.push(frame(1));
        queue.close();
        assert_eq!(queue.pop().await.unwrap(), frame(1));
        assert!(queue.pop().await.is_none());
        // Terminal: stays ended.
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_parked_consumer() {
        let queue = Arc::new(LossyQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let got = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn push_after_close_is_ignored() {
        let queue = LossyQueue::new();
        queue.close();
        queue.push(frame(1));
        assert!(queue.pop().await.is_none());
    }

    // ========== LaneHub ==========

    #[tokio::test]
    async fn broadcast_duplicates_to_all_queues() {
        let hub = LaneHub::new();
        let a = hub.attach();
        let b = hub.attach();
        assert_eq!(hub.broadcast(frame(1)), 2);
        assert_eq!(a.pop().await.unwrap(), frame(1));
        assert_eq!(b.pop().await.unwrap(), frame(1));
    }

    #[tokio::test]
    async fn detached_queues_are_pruned() {
        let hub = LaneHub::new();
        let a = hub.attach();
        let b = hub.attach();
        b.detach();
        assert_eq!(hub.broadcast(frame(1)), 1);
        assert_eq!(a.pop().await.unwrap(), frame(1));
    }

    #[tokio::test]
    async fn drops_are_independent_per_subscriber() {
        let hub = LaneHub::new();
        let fast = hub.attach();
        let slow = hub.attach();

        // Push half the capacity, drain the fast queue, push the rest plus
        // an overflow. Only the slow queue drops.
        for i in 0..CHANNEL_CAPACITY / 2 {
            hub.broadcast(frame(i));
        }
        while fast.len() > 0 {
            let _ = fast.pop().await;
        }
        for i in 0..CHANNEL_CAPACITY {
            hub.broadcast(frame(1000 + i));
        }
        assert_eq!(fast.dropped(), 0);
        assert_eq!(slow.dropped(), (CHANNEL_CAPACITY / 2) as u64);
    }

    #[tokio::test]
    async fn attach_after_close_yields_an_ended_queue() {
        let hub = LaneHub::new();
        hub.close();
        let late = hub.attach();
        assert!(late.pop().await.is_none());
    }

    #[tokio::test]
    async fn attach_after_broadcast_sees_nothing_old() {
        let hub = LaneHub::new();
        hub.broadcast(frame(1));
        let late = hub.attach();
        assert_eq!(late.len(), 0);
        hub.broadcast(frame(2));
        assert_eq!(late.pop().await.unwrap(), frame(2));
    }
}
