//! In-process invalidation event bus
//!
//! Grounded on `enterprise::cache::invalidation::PubSubInvalidator`: a
//! single `tokio::sync::broadcast` topic that every interested component
//! (warming predictor, remote-cache mirror, audit sink) can subscribe to
//! independently. Lagging subscribers drop the oldest events rather than
//! block publishers (spec §4.5 "fan-out is best-effort").

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::invalidation::audit::{InvalidationReason, InvalidationTarget};

/// Capacity of the broadcast channel buffer. Sized well above the
/// expected burst of a single invalidation fan-out.
const TOPIC_CAPACITY: usize = 4096;

/// Published whenever the invalidation coordinator processes a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Correlates back to the originating [`crate::invalidation::audit::InvalidationRecord`].
    pub request_id: uuid::Uuid,
    /// What was invalidated.
    pub target: InvalidationTarget,
    /// Why.
    pub reason: InvalidationReason,
}

/// A broadcast topic for [`InvalidationEvent`]s.
pub struct Topic {
    tx: broadcast::Sender<InvalidationEvent>,
}

impl Topic {
    /// Create a new topic with the default buffer capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
        Self { tx }
    }

    /// Publish an event to every current subscriber. Returns the number
    /// of subscribers it was delivered to (0 if none are listening).
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let topic = Topic::new();
        let mut rx1 = topic.subscribe();
        let mut rx2 = topic.subscribe();

        let event = InvalidationEvent {
            request_id: uuid::Uuid::new_v4(),
            target: InvalidationTarget::Keys(vec!["k".to_string()]),
            reason: InvalidationReason::Explicit,
        };
        let delivered = topic.publish(event.clone());
        assert_eq!(delivered, 2);

        let got1 = rx1.recv().await.unwrap();
        let got2 = rx2.recv().await.unwrap();
        assert_eq!(got1.request_id, event.request_id);
        assert_eq!(got2.request_id, event.request_id);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let topic = Topic::new();
        assert_eq!(topic.publish(InvalidationEvent {
            request_id: uuid::Uuid::new_v4(),
            target: InvalidationTarget::Pattern("x*".to_string()),
            reason: InvalidationReason::Policy,
        }), 0);
    }
}
