use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change notifications, keyed by entity id. A subscriber
/// watching a vehicle sees every reservation event on that vehicle; watching
/// a customer sees that customer's own lifecycle events.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for an entity. Creates the channel if needed.
    pub fn subscribe(&self, entity_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(entity_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, entity_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&entity_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel once the entity is gone.
    pub fn remove(&self, entity_id: &Ulid) {
        self.channels.remove(entity_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReservationStatus, Span};

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vehicle_id = Ulid::new();
        let mut rx = hub.subscribe(vehicle_id);

        let event = Event::ReservationCreated {
            id: Ulid::new(),
            customer_id: Ulid::new(),
            vehicle_id,
            span: Span::new(1_000, 2_000),
            status: ReservationStatus::Pending,
        };
        hub.send(vehicle_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        hub.send(id, &Event::VehicleDeleted { id });
    }

    #[tokio::test]
    async fn removed_channel_drops_future_sends() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        let mut rx = hub.subscribe(id);
        hub.remove(&id);
        hub.send(id, &Event::CustomerDeleted { id });
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Closed)));
    }
}
