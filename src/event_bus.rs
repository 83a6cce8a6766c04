//! Process-wide event publication.
//!
//! The Electrum pool publishes connection events both to its registered
//! status listeners and onto an `EventBus` handed in at construction, so
//! downstream subsystems can observe chain connectivity without registering
//! with the pool directly. The bus is an injected handle, not a global.

use thiserror::Error;
use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event-bus errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Bus receiver failed: {0}")]
    ReceiveFailure(String),
}

type Result<T> = std::result::Result<T, Error>;

/// Broadcast bus delivering every published event to all subscribers.
///
/// Late subscribers do not receive past events. Slow subscribers that fall
/// more than the buffer capacity behind start missing events.
#[derive(Debug, Clone)]
pub struct EventBus<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Create a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
        }
    }

    /// Create a new subscriber to receive events.
    pub fn subscribe(&self) -> EventReceiver<T> {
        EventReceiver::new(self.sender.subscribe())
    }

    /// Publish an event to all subscribers.
    ///
    /// Having no subscribers is not an error; the event is dropped.
    pub fn publish(&self, event: T) {
        let _ = self.sender.send(event);
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Receiving side of an [`EventBus`] subscription.
#[derive(Debug)]
pub struct EventReceiver<T: Clone> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> EventReceiver<T> {
    fn new(receiver: broadcast::Receiver<T>) -> Self {
        Self {
            receiver,
        }
    }

    pub async fn recv(&mut self) -> Result<T> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                Err(Error::ReceiveFailure(format!("lagged {} events", n)))
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(Error::ReceiveFailure("event bus closed".to_string()))
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish("tip update");

        assert_eq!(rx.recv().await.unwrap(), "tip update");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(16);
        bus.publish("nobody listening");
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(42u32);

        assert_eq!(rx1.recv().await.unwrap(), 42);
        assert_eq!(rx2.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_past_events() {
        let bus = EventBus::new(16);
        bus.publish(1u32);

        let mut rx = bus.subscribe();
        bus.publish(2u32);

        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
