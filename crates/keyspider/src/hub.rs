//! In-process pubsub for live access events, feeding SSE readers.
//!
//! Best-effort by design: every subscriber owns a bounded channel, and a
//! publish never blocks. A subscriber that cannot keep up loses events
//! rather than stalling the watcher.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct Hub {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<Bytes>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the given channel capacity.
    pub fn subscribe(&self, buffer: usize) -> (u64, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        let mut inner = self.inner.lock().expect("hub lock");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber; dropping its sender ends the receiver's stream.
    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().expect("hub lock").subscribers.remove(&id);
    }

    /// Deliver a payload to every subscriber without blocking. Full buffers
    /// drop the payload; closed receivers are pruned.
    pub fn publish(&self, payload: Bytes) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.subscribers.retain(|id, tx| match tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!(subscriber = id, "dropping event for slow subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("hub lock").subscribers.len()
    }
}

#[cfg(test)]
mod test {
    use super::Hub;
    use bytes::Bytes;

    #[tokio::test]
    async fn every_subscriber_sees_events_in_publish_order() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.subscribe(8);
        let (_b, mut rx_b) = hub.subscribe(8);

        hub.publish(Bytes::from_static(b"one"));
        hub.publish(Bytes::from_static(b"two"));

        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn slow_subscribers_drop_but_do_not_block_others() {
        let hub = Hub::new();
        let (_slow, mut rx_slow) = hub.subscribe(1);
        let (_fast, mut rx_fast) = hub.subscribe(8);

        hub.publish(Bytes::from_static(b"one"));
        hub.publish(Bytes::from_static(b"two"));

        // The slow subscriber holds only the first event; the second was
        // dropped on its full buffer.
        assert_eq!(rx_slow.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx_slow.try_recv().ok(), None);

        assert_eq!(rx_fast.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx_fast.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let hub = Hub::new();
        let (id, mut rx) = hub.subscribe(8);
        hub.unsubscribe(id);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let hub = Hub::new();
        let (_id, rx) = hub.subscribe(8);
        drop(rx);
        hub.publish(Bytes::from_static(b"one"));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
