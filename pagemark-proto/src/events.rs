//! Typed event bus
//!
//! Network and sync lifecycle notifications travel over one broadcast
//! channel keyed by a closed enum, so subscribers match on variants
//! instead of string topics.

use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle events published by the probe, coordinator, and engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connectivity regained; verification against the API has started.
    NetworkOnlineStart,
    /// The local API answered its health probe.
    NetworkOnline {
        /// Whether the external search dependency is also reachable.
        external_reachable: bool,
    },
    /// Connectivity loss detected; components should stop issuing requests.
    NetworkOfflineStart,
    NetworkOffline,
    /// A sync cycle began with this many queued items.
    SyncStarted { pending: usize },
    SyncProgress { processed: usize, remaining: usize },
    /// Emitted exactly once per cycle when the outbox drains.
    SyncCompleted { processed: usize },
    /// A write was queued instead of sent; the engine should run a pass
    /// when conditions allow.
    SyncDeferred,
    /// Items exhausted their retries and need operator attention.
    SyncFailedItems { count: usize },
}

const BUS_CAPACITY: usize = 256;

/// Clone-able publish-subscribe hub.
///
/// Publishing never blocks; subscribers that fall behind see a lagged
/// error from their receiver, which is acceptable for lifecycle
/// notifications because every consumer re-reads authoritative state
/// from the store or coordinator on wake.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// A send error only means nobody is listening, which is fine.
    pub fn publish(&self, event: Event) {
        debug!(?event, "publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::SyncStarted { pending: 3 });
        bus.publish(Event::SyncCompleted { processed: 3 });

        assert_eq!(rx.recv().await.unwrap(), Event::SyncStarted { pending: 3 });
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::SyncCompleted { processed: 3 }
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(Event::NetworkOfflineStart);

        let mut rx = bus.subscribe();
        bus.publish(Event::NetworkOffline);
        assert_eq!(rx.recv().await.unwrap(), Event::NetworkOffline);
    }
}
