//! In-process event buses on tokio broadcast channels.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::core::{BoardError, BoardEvent, EventPublisher};

/// Fan-out bus: every subscriber sees every event sent after it subscribed.
pub struct BroadcastEventBus<E> {
    tx: broadcast::Sender<E>,
    capacity: usize,
}

impl<E: Clone + Send + 'static> BroadcastEventBus<E> {
    /// Create a bus holding up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Send an event, returning how many subscribers received it.
    ///
    /// Sending with no subscribers is not an error.
    pub fn send(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for BroadcastEventBus<E> {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus<BoardEvent> {
    async fn publish(&self, event: BoardEvent) -> Result<(), BoardError> {
        let topic = event.topic();
        let delivered = self.send(event);
        tracing::trace!(topic, delivered, "event published");
        Ok(())
    }
}
