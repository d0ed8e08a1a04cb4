//! Identity events and the broadcast bus that distributes them.
//!
//! Whenever a user's group membership, subscription set, or terms-acceptance
//! state changes, the mutation site emits an [`IdentityEvent`]. The bitmap
//! listener subscribes, re-resolves the affected user's access, and persists
//! the result, so the materialized bitmap can never silently drift from its
//! inputs.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A change to one of the inputs of a user's materialized bitmap.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum IdentityEvent {
    /// The user's group set changed (plan group added or removed).
    GroupsChanged { user_id: Uuid },
    /// The user's subscription set changed.
    SubscriptionsChanged { user_id: Uuid },
    /// The user accepted the terms of use.
    TermsAccepted { user_id: Uuid },
}

impl IdentityEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            IdentityEvent::GroupsChanged { .. } => "GroupsChanged",
            IdentityEvent::SubscriptionsChanged { .. } => "SubscriptionsChanged",
            IdentityEvent::TermsAccepted { .. } => "TermsAccepted",
        }
    }

    /// The user whose bitmap inputs changed.
    pub fn user_id(&self) -> Uuid {
        match self {
            IdentityEvent::GroupsChanged { user_id }
            | IdentityEvent::SubscriptionsChanged { user_id }
            | IdentityEvent::TermsAccepted { user_id } => *user_id,
        }
    }
}

/// Broadcast-based event bus for distributing identity events to consumers.
///
/// Uses `tokio::sync::broadcast` with a configurable buffer size. Slow
/// receivers that fall behind will receive a `Lagged` error and miss events;
/// the bitmap listener compensates by re-resolving from current state, so a
/// missed event only delays convergence until the next one.
pub struct EventBus {
    tx: broadcast::Sender<IdentityEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers.
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub fn emit(&self, event: IdentityEvent) {
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %event.event_type(),
            user_id = %event.user_id(),
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        let user_id = Uuid::nil();
        bus.emit(IdentityEvent::TermsAccepted { user_id });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, IdentityEvent::TermsAccepted { .. }));
        assert_eq!(event.user_id(), user_id);
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(IdentityEvent::GroupsChanged {
            user_id: Uuid::nil(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            IdentityEvent::GroupsChanged { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            IdentityEvent::GroupsChanged { .. }
        ));
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(32);
        // Should not panic even with no subscribers
        bus.emit(IdentityEvent::SubscriptionsChanged {
            user_id: Uuid::nil(),
        });
    }

    #[tokio::test]
    async fn test_event_bus_subscriber_count() {
        let bus = EventBus::new(32);
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_type_names() {
        let user_id = Uuid::nil();
        assert_eq!(
            IdentityEvent::GroupsChanged { user_id }.event_type(),
            "GroupsChanged"
        );
        assert_eq!(
            IdentityEvent::SubscriptionsChanged { user_id }.event_type(),
            "SubscriptionsChanged"
        );
        assert_eq!(
            IdentityEvent::TermsAccepted { user_id }.event_type(),
            "TermsAccepted"
        );
    }

    #[test]
    fn test_event_json_serialization() {
        let event = IdentityEvent::TermsAccepted {
            user_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"TermsAccepted"#));
        assert!(json.contains("user_id"));
    }
}
