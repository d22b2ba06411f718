use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::message::Message;

/// Called synchronously by `emit`. Handlers should hand the message off
/// (e.g. to a dispatch queue) rather than do work inline.
pub type RelayHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Topic a node listens on for replies redirected to it.
pub fn node_topic(node_id: &str) -> String {
    format!("node:{}", node_id)
}

/// Process-wide topic → listener map used to redirect a reply straight to
/// the node that asked for it, bypassing the graph wires.
///
/// Topics are one-to-one with node instances, so each has at most one listener.
pub struct EventRelayBus {
    listeners: DashMap<String, (u64, RelayHandler)>,
    next_id: AtomicU64,
}

impl EventRelayBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers `handler` for `topic` until the returned guard is dropped.
    /// An existing listener on the same topic is replaced.
    pub fn subscribe(self: &Arc<Self>, topic: &str, handler: RelayHandler) -> RelaySubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.listeners.insert(topic.to_string(), (id, handler)).is_some() {
            warn!(topic, "replacing existing relay listener");
        } else {
            debug!(topic, "relay listener registered");
        }
        RelaySubscription {
            bus: Arc::downgrade(self),
            topic: topic.to_string(),
            id,
        }
    }

    /// Delivers `message` to the topic's listener, if any.
    /// Returns `false` when nobody listens; the message is dropped.
    pub fn emit(&self, topic: &str, message: Message) -> bool {
        // clone out so the handler never runs under the map's shard lock
        let handler = self.listeners.get(topic).map(|entry| entry.value().1.clone());
        match handler {
            Some(handler) => {
                trace!(topic, "relaying message");
                handler(message);
                true
            }
            None => {
                debug!(topic, "no relay listener, message dropped");
                false
            }
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.listeners.contains_key(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        if self.listeners.remove_if(topic, |_, (owner, _)| *owner == id).is_some() {
            debug!(topic, "relay listener removed");
        }
    }
}

impl fmt::Debug for EventRelayBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRelayBus")
            .field("topics", &self.topics())
            .finish()
    }
}

/// Keeps a relay listener registered. Dropping it unsubscribes, unless the
/// topic has since been taken over by another listener.
#[must_use = "dropping the subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct RelaySubscription {
    bus: Weak<EventRelayBus>,
    topic: String,
    id: u64,
}

impl RelaySubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for RelaySubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (RelayHandler, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        let handler: RelayHandler = Arc::new(move |msg| sink.lock().unwrap().push(msg));
        (handler, seen)
    }

    #[test]
    fn test_node_topic() {
        assert_eq!(node_topic("A"), "node:A");
    }

    #[test]
    fn test_emit_reaches_listener() {
        let bus = EventRelayBus::new();
        let (handler, seen) = recorder();
        let _sub = bus.subscribe("node:A", handler);

        assert!(bus.emit("node:A", Message::new(json!({"chatId": "42"}))));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload["chatId"], "42");
    }

    #[test]
    fn test_emit_without_listener_is_dropped() {
        let bus = EventRelayBus::new();
        assert!(!bus.emit("node:ghost", Message::new(json!("hi"))));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventRelayBus::new();
        let (handler, _) = recorder();
        let sub = bus.subscribe("node:A", handler);
        assert!(bus.is_subscribed("node:A"));
        drop(sub);
        assert!(!bus.is_subscribed("node:A"));
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn test_stale_guard_keeps_replacement() {
        let bus = EventRelayBus::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        let old = bus.subscribe("node:A", first);
        let _new = bus.subscribe("node:A", second);
        drop(old);

        assert!(bus.emit("node:A", Message::new(json!(1))));
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(second_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_guard_outlives_bus() {
        let bus = EventRelayBus::new();
        let (handler, _) = recorder();
        let sub = bus.subscribe("node:A", handler);
        drop(bus);
        drop(sub);
    }
}
