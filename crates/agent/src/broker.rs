//! Non-blocking fan-out of events to N subscribers.
//!
//! Each subscriber gets a bounded channel (capacity 64). Publishing
//! uses `try_send`: a subscriber whose buffer is full loses that event
//! for itself only, and the publisher never blocks behind a slow
//! consumer. Unsubscribing closes the stream exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Per-subscriber buffer size.
const SUBSCRIBER_CAPACITY: usize = 64;

struct Shared<T> {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<T>)>>,
    next_id: AtomicU64,
}

pub struct EventBroker<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventBroker<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBroker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBroker<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber. Dropping the returned [`Subscription`]
    /// (or calling `cancel` on it) closes the stream.
    pub fn subscribe(&self) -> (mpsc::Receiver<T>, Subscription<T>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().push((id, tx));
        (
            rx,
            Subscription {
                id,
                shared: self.shared.clone(),
            },
        )
    }

    /// Deliver `event` to every live subscriber without blocking.
    /// Full buffers drop the event for that subscriber; closed
    /// receivers are pruned.
    pub fn publish(&self, event: &T) {
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(subscriber = id, "subscriber buffer full; event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

/// Handle that removes its subscriber when cancelled or dropped.
pub struct Subscription<T> {
    id: u64,
    shared: Arc<Shared<T>>,
}

impl<T> Subscription<T> {
    /// Remove the subscriber and close its stream. Idempotent.
    pub fn cancel(&self) {
        self.shared
            .subscribers
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let broker: EventBroker<u32> = EventBroker::new();
        let (mut rx1, _sub1) = broker.subscribe();
        let (mut rx2, _sub2) = broker.subscribe();

        broker.publish(&7);
        assert_eq!(rx1.recv().await, Some(7));
        assert_eq!(rx2.recv().await, Some(7));
    }

    #[tokio::test]
    async fn full_subscriber_drops_only_its_own_events() {
        let broker: EventBroker<u32> = EventBroker::new();
        let (mut slow_rx, _slow) = broker.subscribe();
        let (mut fast_rx, _fast) = broker.subscribe();

        // Overfill: capacity is 64, publish 70 without reading slow_rx.
        for i in 0..70u32 {
            broker.publish(&i);
            // Keep the fast subscriber drained.
            assert_eq!(fast_rx.recv().await, Some(i));
        }

        // Slow subscriber got exactly the first 64.
        let mut received = Vec::new();
        while let Ok(v) = slow_rx.try_recv() {
            received.push(v);
        }
        assert_eq!(received, (0..64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancel_closes_stream_and_stops_delivery() {
        let broker: EventBroker<u32> = EventBroker::new();
        let (mut rx, sub) = broker.subscribe();

        broker.publish(&1);
        assert_eq!(rx.recv().await, Some(1));

        sub.cancel();
        broker.publish(&2);
        // Stream is closed: no further values.
        assert_eq!(rx.recv().await, None);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let broker: EventBroker<u32> = EventBroker::new();
        let (_rx, sub) = broker.subscribe();
        sub.cancel();
        sub.cancel();
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn drop_subscription_unsubscribes() {
        let broker: EventBroker<u32> = EventBroker::new();
        let (_rx, sub) = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_is_pruned_on_publish() {
        let broker: EventBroker<u32> = EventBroker::new();
        let (rx, sub) = broker.subscribe();
        drop(rx);
        // The subscription handle still exists, but the receiver is gone.
        broker.publish(&1);
        assert_eq!(broker.subscriber_count(), 0);
        drop(sub);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_noop() {
        let broker: EventBroker<u32> = EventBroker::new();
        broker.publish(&42);
        assert_eq!(broker.subscriber_count(), 0);
    }
}
