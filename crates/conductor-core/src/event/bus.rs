//! Broadcast event bus for distributing `ConductorEvent` to subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op; slow subscribers observe `Lagged` rather than blocking
//! producers.

use conductor_types::event::ConductorEvent;
use tokio::sync::broadcast;

/// Multi-producer, multi-consumer lifecycle event channel.
///
/// Cloning the bus clones the sender.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConductorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ConductorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn dead_letter(n: usize) -> ConductorEvent {
        ConductorEvent::DeadLettered {
            dlq_id: Uuid::now_v7(),
            event_id: format!("evt-{n}"),
            event_type: "order.created".to_string(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        bus.publish(dead_letter(1));

        assert!(matches!(rx1.recv().await.unwrap(), ConductorEvent::DeadLettered { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), ConductorEvent::DeadLettered { .. }));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(dead_letter(1));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn lagging_subscriber_sees_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(dead_letter(i));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
