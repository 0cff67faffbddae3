//! Typed execution event bus.
//!
//! Single broadcast channel carrying every [`ExecutionEvent`]. Producers
//! (router, position manager, execution manager) publish fire-and-forget;
//! any number of observers subscribe. Per-instrument ordering is preserved
//! because producers only publish while holding that instrument's
//! serialization lock.

use tokio::sync::broadcast;

use crate::models::ExecutionEvent;

/// Broadcast hub for execution events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers that got the event, or `None` when
    /// nobody is subscribed. Lagging subscribers lose the oldest events,
    /// never block the publisher.
    pub fn publish(&self, event: ExecutionEvent) -> Option<usize> {
        let event_type = event.event_type();
        let receivers = self.tx.send(event).ok();
        tracing::debug!(
            event_type,
            receivers = receivers.unwrap_or(0),
            "published execution event"
        );
        receivers
    }

    /// Get a new receiver subscribed to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
