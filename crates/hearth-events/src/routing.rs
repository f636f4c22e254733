//! The event bus.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;

use crate::payloads::{DEFAULT_BUS_CAPACITY, Event, EventEnvelope, EventId};

/// Stream handed to subscribers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Cloneable handle to a shared broadcast channel of [`EventEnvelope`]s.
///
/// Publishing never blocks and succeeds with no subscribers attached.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    next_id: Arc<Mutex<EventId>>,
}

impl EventBus {
    /// Bus whose subscribers buffer up to `capacity` events (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Bus with [`DEFAULT_BUS_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stamp `event` with the next id and broadcast it.
    ///
    /// The id counter stays locked until the send completes, so concurrent
    /// publishers deliver in id order.
    #[must_use]
    pub fn publish(&self, event: Event) -> EventId {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next = id.saturating_add(1);
        let _ = self.sender.send(EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        });
        drop(next);
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
