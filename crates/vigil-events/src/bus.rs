//! Copy-on-write pub/sub bus.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::event::Event;

/// One subscriber: an unbounded channel sender. Unbounded because a slow
/// subscriber must never back-pressure the publisher — publish happens
/// inline with registry mutation and must not block (§4.4).
type Subscriber = mpsc::UnboundedSender<Event>;

/// The event bus. Cloning is cheap (an `Arc` around the subscriber-list
/// pointer); every clone publishes to and can subscribe against the same
/// underlying list.
#[derive(Clone)]
pub struct Bus {
    subscribers: Arc<ArcSwap<Vec<Subscriber>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Registers a new subscriber and returns its receiving half.
    ///
    /// Appending is copy-on-write: the whole subscriber vector is cloned,
    /// the new sender pushed on, and the result swapped in atomically.
    /// Reads (in `publish`) never observe a partially-updated list.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.rcu(|current| {
            let mut next = (**current).clone();
            next.push(tx.clone());
            next
        });
        rx
    }

    /// Publishes an event to every current subscriber.
    ///
    /// Subscribers whose receiver has already been dropped are pruned
    /// lazily on the next publish rather than eagerly on every send, to
    /// keep the common case (no churn) allocation-free.
    pub fn publish(&self, event: Event) {
        let current = self.subscribers.load();
        let mut any_closed = false;
        for subscriber in current.iter() {
            if subscriber.send(event.clone()).is_err() {
                any_closed = true;
            }
        }
        if any_closed {
            self.prune();
        }
    }

    fn prune(&self) {
        self.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|s| !s.is_closed())
                .cloned()
                .collect::<Vec<Subscriber>>()
        });
    }

    /// Number of live subscribers, for tests and diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{HostName, ObjectKey};

    fn sample_event() -> Event {
        Event::new(
            crate::EventKind::NewCheckResult,
            ObjectKey::host(HostName("h1".into())),
            None,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        bus.publish(sample_event());
        let received = rx.recv().await.expect("channel closed unexpectedly");
        assert_eq!(received.kind, crate::EventKind::NewCheckResult);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = Bus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(sample_event());
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let bus = Bus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        bus.publish(sample_event());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
