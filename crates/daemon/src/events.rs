//! Event bus fanning job output out to every connected observer.
//!
//! Every subscriber receives every event; observers filter by channel
//! token on their side. Subscribers are registered and removed by identity
//! so that several connections may watch the same channel and a closed
//! connection is never written to again.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{debug, info};
use uuid::Uuid;

/// Payload of a `log` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub channel: String,
    pub message: String,
}

/// Events published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Log(LogEvent),
}

impl BusEvent {
    /// Event name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::Log(_) => "log",
        }
    }

    /// Channel token the event belongs to.
    pub fn channel(&self) -> &str {
        match self {
            BusEvent::Log(log) => &log.channel,
        }
    }
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::UnboundedSender<BusEvent>,
}

#[derive(Default)]
struct Registry {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Registry {
    fn remove(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write();
        match subscribers.iter().position(|s| s.id == id) {
            Some(idx) => {
                subscribers.swap_remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Publish/subscribe hub shared by the job runner and the HTTP layer.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let count = {
            let mut subscribers = self.registry.subscribers.write();
            subscribers.push(Subscriber { id, tx });
            subscribers.len()
        };
        info!(subscriber = %id, clients = count, "Event subscriber connected");
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to every registered subscriber. Publishing with no
    /// subscribers is a no-op.
    pub fn publish(&self, event: BusEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.registry.subscribers.read();
            for subscriber in subscribers.iter() {
                if subscriber.tx.send(event.clone()).is_err() {
                    closed.push(subscriber.id);
                }
            }
        }
        for id in closed {
            if self.registry.remove(id) {
                debug!(subscriber = %id, "Pruned closed event subscriber");
            }
        }
    }

    /// Publish a `log` event on `channel`.
    pub fn publish_log(&self, channel: &str, message: impl Into<String>) {
        self.publish(BusEvent::Log(LogEvent {
            channel: channel.to_string(),
            message: message.into(),
        }));
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.read().len()
    }
}

/// A registered observer. Dropping it unregisters exactly this subscriber.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<BusEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = BusEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                info!(
                    subscriber = %self.id,
                    clients = registry.subscribers.read().len(),
                    "Event subscriber disconnected"
                );
            }
        }
    }
}
