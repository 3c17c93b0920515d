//! Broadcast bus for dispatch events

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::EventEnvelope;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel between the dispatcher and reporting collaborators.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    published: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an envelope to all current subscribers.
    ///
    /// Returns how many subscribers received it; with none the envelope is
    /// dropped and 0 is returned.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Events published before this call are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("published_count", &self.published_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use dispatch_core::RunStatus;

    fn finished(workflow_id: &str) -> EventEnvelope {
        EventEnvelope::new(Event::WorkflowFinished {
            plan_id: "plan-test".to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Executed,
        })
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let envelope = finished("a");
        assert_eq!(bus.publish(envelope.clone()), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);
        assert_eq!(received.event, envelope.event);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let envelope = finished("a");
        let envelope_id = envelope.id;
        assert_eq!(bus.publish(envelope), 2);

        assert_eq!(rx1.recv().await.unwrap().id, envelope_id);
        assert_eq!(rx2.recv().await.unwrap().id, envelope_id);
    }

    #[tokio::test]
    async fn test_no_subscribers_drops_event() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(finished("a")), 0);
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_order_preserved_per_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for id in ["a", "b", "c"] {
            bus.publish(finished(id));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Event::WorkflowFinished { workflow_id, .. } = rx.recv().await.unwrap().event {
                seen.push(workflow_id);
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        let _rx = bus2.subscribe();
        assert_eq!(bus1.subscriber_count(), 1);

        bus2.publish(finished("a"));
        assert_eq!(bus1.published_count(), 1);
    }
}
