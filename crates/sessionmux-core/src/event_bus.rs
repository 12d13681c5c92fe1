//! Event Bus - Gateway event distribution
//!
//! The pool and keep-alive sweep emit [`GatewayEvent`]s here; the
//! application subscribes to react to lost connections, reconnects and
//! logouts without polling the pool.
//!
//! # Usage
//!
//! ```ignore
//! let event_bus = EventBus::new();
//! let sender = event_bus.sender();
//! let mut receiver = event_bus.subscribe();
//!
//! sender.emit(GatewayEvent::LoggedOut { connectors: 2 });
//!
//! while let Some(event) = receiver.recv().await { ... }
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::GatewayEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast hub for gateway events. Each subscriber gets every event
/// emitted after it subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Get a sender for emitting events
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheaply cloneable handle used by gateway components to emit events.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventSender {
    /// Emit an event.
    ///
    /// Returns the number of receivers; 0 when nobody listens (not an error).
    pub fn emit(&self, event: GatewayEvent) -> usize {
        let type_name = event.type_name();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(
                    event_type = type_name,
                    receivers = count,
                    "[EventBus] Emitted event"
                );
                count
            }
            Err(_) => {
                debug!(event_type = type_name, "[EventBus] No receivers for event");
                0
            }
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Subscriber end of the bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<GatewayEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is dropped. Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped_events = skipped, "[EventBus] Receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[EventBus] Channel closed");
                    return None;
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped_events = skipped, "[EventBus] Receiver lagged on try_recv");
                self.receiver.try_recv().ok()
            }
            Err(_) => None,
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<GatewayEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Shared event bus for application-wide use
pub type SharedEventBus = Arc<EventBus>;

pub fn create_shared_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}
