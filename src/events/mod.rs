//! Event bus for call notifications
//!
//! Observers registered on a session are called synchronously; the bus is
//! the asynchronous side for tasks that want a stream of events.

pub mod types;

pub use types::CallEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for call events
///
/// ```no_run
/// use telecall::events::{CallEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// bus.publish(CallEvent::ParticipantJoined { peer_id: "b".into() });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped when nobody listens
    pub fn publish(&self, event: CallEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive all future events
    ///
    /// A subscriber that falls behind by more than the ring size gets
    /// `Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
