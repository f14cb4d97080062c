use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "serial", rename_all = "snake_case")]
pub enum ClientEvent {
    Connected(String),
    Disconnected(String),
}

/// Fan-out of [`ClientEvent`]s. Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ClientEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        let (tx, rx) = channel();
        if let Ok(mut guard) = self.subscribers.lock() {
            guard.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: ClientEvent) {
        if let Ok(mut guard) = self.subscribers.lock() {
            guard.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(ClientEvent::Connected("10.0.0.2:5555".to_string()));
        bus.publish(ClientEvent::Disconnected("10.0.0.2:5555".to_string()));

        for rx in [first, second] {
            let events: Vec<ClientEvent> = rx.try_iter().collect();
            assert_eq!(
                events,
                vec![
                    ClientEvent::Connected("10.0.0.2:5555".to_string()),
                    ClientEvent::Disconnected("10.0.0.2:5555".to_string()),
                ]
            );
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(ClientEvent::Connected("x".to_string()));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().ok(), Some(ClientEvent::Connected("x".to_string())));
    }

    #[test]
    fn serializes_with_event_tag() {
        let value = serde_json::to_value(ClientEvent::Connected("x".to_string())).expect("json");
        assert_eq!(value, serde_json::json!({ "event": "connected", "serial": "x" }));
    }
}
