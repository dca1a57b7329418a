//! Serialized event delivery
//!
//! Producers on any task enqueue events through an [`EventSink`]. One
//! delivery task drains the queue in emission order and forwards each event
//! to the current subscriber of its category. Subscribing goes through the
//! same queue, so a new subscriber sees exactly the events emitted after it
//! took effect.

use btsock_shared::{Event, EventCategory};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

enum Delivery {
    Emit(Event),
    Subscribe(EventCategory, mpsc::UnboundedSender<Event>),
}

/// Cloneable handle used by producers to emit events
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl EventSink {
    /// Enqueue an event for delivery; never blocks
    pub fn emit(&self, event: impl Into<Event>) {
        if self.tx.send(Delivery::Emit(event.into())).is_err() {
            trace!("[DISPATCH] Delivery task gone, event dropped");
        }
    }
}

/// Receiving end of one category subscription
///
/// Ends (`recv` returns `None`) once the category is re-subscribed.
pub struct Subscription {
    category: EventCategory,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// Receive the next event (blocks until available)
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Receive an already delivered event without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Owns the delivery task and the subscriber table
pub struct EventDispatcher {
    sink: EventSink,
}

impl EventDispatcher {
    /// Create a dispatcher and start its delivery task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(rx));
        Self {
            sink: EventSink { tx },
        }
    }

    /// Get a producer handle
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Subscribe to a category, replacing any previous subscriber
    pub fn subscribe(&self, category: EventCategory) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .sink
            .tx
            .send(Delivery::Subscribe(category, tx))
            .is_err()
        {
            debug!("[DISPATCH] Delivery task gone, {:?} subscription is inert", category);
        }
        Subscription { category, rx }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    let mut subscribers: HashMap<EventCategory, mpsc::UnboundedSender<Event>> = HashMap::new();

    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Subscribe(category, tx) => {
                if subscribers.insert(category, tx).is_some() {
                    debug!("[DISPATCH] Replaced {:?} subscriber", category);
                }
            }
            Delivery::Emit(event) => {
                let category = event.category();
                let delivered = subscribers
                    .get(&category)
                    .map(|tx| tx.send(event).is_ok());
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        debug!("[DISPATCH] {:?} subscriber went away", category);
                        subscribers.remove(&category);
                    }
                    None => trace!("[DISPATCH] No {:?} subscriber, event dropped", category),
                }
            }
        }
    }

    debug!("[DISPATCH] Delivery task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use btsock_shared::{AdapterEvent, SocketEvent};
    use std::time::Duration;
    use tokio::time::timeout;

    fn data(key: &str, data: &str) -> SocketEvent {
        SocketEvent::DataReceived {
            data: data.into(),
            socket_key: key.into(),
        }
    }

    async fn next(sub: &mut Subscription) -> Event {
        timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription ended")
    }

    #[tokio::test]
    async fn test_delivers_in_emission_order() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(EventCategory::Socket);
        let sink = dispatcher.sink();

        for frame in ["A", "B", "C"] {
            sink.emit(data("k1", frame));
        }

        for frame in ["A", "B", "C"] {
            assert_eq!(next(&mut sub).await, Event::Socket(data("k1", frame)));
        }
    }

    #[tokio::test]
    async fn test_per_producer_order_across_tasks() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(EventCategory::Socket);

        let mut handles = Vec::new();
        for key in ["k1", "k2", "k3"] {
            let sink = dispatcher.sink();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    sink.emit(data(key, &i.to_string()));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("producer panicked");
        }

        let mut last: HashMap<String, i32> = HashMap::new();
        for _ in 0..150 {
            match next(&mut sub).await {
                Event::Socket(SocketEvent::DataReceived { data, socket_key }) => {
                    let n: i32 = data.parse().expect("numeric frame");
                    let prev = last.insert(socket_key, n).unwrap_or(-1);
                    assert_eq!(n, prev + 1, "frames reordered within one producer");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous() {
        let dispatcher = EventDispatcher::new();
        let mut first = dispatcher.subscribe(EventCategory::Server);
        let mut second = dispatcher.subscribe(EventCategory::Server);

        dispatcher.sink().emit(SocketEvent::Stopped {
            listener_key: "srv1".into(),
        });

        assert_eq!(
            next(&mut second).await,
            Event::Socket(SocketEvent::Stopped {
                listener_key: "srv1".into()
            })
        );
        let ended = timeout(Duration::from_secs(2), first.recv())
            .await
            .expect("first subscription should end");
        assert!(ended.is_none());
    }

    #[tokio::test]
    async fn test_routes_by_category() {
        let dispatcher = EventDispatcher::new();
        let mut sockets = dispatcher.subscribe(EventCategory::Socket);
        let mut discovered = dispatcher.subscribe(EventCategory::Discovered);
        let sink = dispatcher.sink();

        sink.emit(AdapterEvent::DeviceFound {
            name: Some("peer".into()),
            address: "00:11:22:33:44:55".into(),
        });
        sink.emit(SocketEvent::Close {
            socket_key: "k1".into(),
        });

        assert!(matches!(
            next(&mut discovered).await,
            Event::Adapter(AdapterEvent::DeviceFound { .. })
        ));
        assert!(matches!(
            next(&mut sockets).await,
            Event::Socket(SocketEvent::Close { .. })
        ));
        assert!(sockets.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_events_before_subscription_are_dropped() {
        let dispatcher = EventDispatcher::new();
        let sink = dispatcher.sink();
        sink.emit(data("k1", "early"));

        let mut sub = dispatcher.subscribe(EventCategory::Socket);
        sink.emit(data("k1", "late"));

        assert_eq!(next(&mut sub).await, Event::Socket(data("k1", "late")));
    }
}
