//! Notification fan-out
//!
//! Subscribers get their own receiver and an unsubscribe handle; the hub
//! drops dead subscribers on publish. Owned by the session, torn down with
//! it.

use crate::notify::NotificationEvent;
use crossbeam_channel::{bounded, Receiver, Sender};
use uuid::Uuid;

/// Handle identifying one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(Uuid);

/// Fan-out point for notification events
#[derive(Default)]
pub struct NotificationHub {
    subscribers: Vec<(SubscriptionId, Sender<NotificationEvent>)>,
}

impl NotificationHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<NotificationEvent>) {
        let id = SubscriptionId(Uuid::new_v4());
        let (tx, rx) = bounded(100);
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&mut self, event: &NotificationEvent) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop all subscriptions
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(title: &str) -> NotificationEvent {
        NotificationEvent {
            title: title.to_string(),
            body: String::new(),
            action: None,
        }
    }

    #[test]
    fn test_subscribers_receive_published_events() {
        let mut hub = NotificationHub::new();
        let (_id_a, rx_a) = hub.subscribe();
        let (_id_b, rx_b) = hub.subscribe();

        hub.publish(&event("ping"));

        assert_eq!(rx_a.try_recv().unwrap().title, "ping");
        assert_eq!(rx_b.try_recv().unwrap().title, "ping");
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut hub = NotificationHub::new();
        let (id, rx) = hub.subscribe();

        hub.unsubscribe(id);
        hub.publish(&event("after"));

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned_on_publish() {
        let mut hub = NotificationHub::new();
        let (_id, rx) = hub.subscribe();
        drop(rx);

        hub.publish(&event("gone"));

        assert_eq!(hub.subscriber_count(), 0);
    }
}
