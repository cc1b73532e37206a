// src/events/bus.rs
//! Record event bus
//!
//! Fan-out of record lifecycle events to any number of subscribers (the
//! Network Panel, the archive recorder). Built on a bounded broadcast ring:
//! `publish` never waits, and a subscriber that falls behind loses its
//! oldest undelivered events and is handed a `Gap` marker instead.

use crate::observability::metric_names;
use crate::record::{RecordId, RequestRecord, RequestState};
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Record appended to the store (always `Pending`)
    Created,
    /// Record replaced by a newer version
    Updated,
    /// Record removed by the capacity policy
    Evicted,
}

/// One record change, carrying the record as it was right after the change
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub kind: EventKind,
    pub record: Arc<RequestRecord>,
}

impl RecordEvent {
    pub fn new(kind: EventKind, record: Arc<RequestRecord>) -> Self {
        Self { kind, record }
    }

    pub fn id(&self) -> RecordId {
        self.record.id
    }

    pub fn sequence(&self) -> u64 {
        self.record.sequence
    }

    pub fn state(&self) -> RequestState {
        self.record.state
    }
}

/// Item handed to a subscriber
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(RecordEvent),
    /// `missed` events were discarded because this subscriber lagged
    Gap { missed: u64 },
}

/// Bounded, non-blocking event bus
pub struct EventBus {
    sender: broadcast::Sender<RecordEvent>,
    capacity: usize,
    published: AtomicU64,
    missed: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus buffering at most `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
            missed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that will see it. Having no
    /// subscribers is not an error.
    pub fn publish(&self, event: RecordEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> EventStream {
        debug!("New event bus subscriber");
        EventStream {
            receiver: self.sender.subscribe(),
            missed: Arc::clone(&self.missed),
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
            capacity: self.capacity,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Per-subscriber view of the bus
pub struct EventStream {
    receiver: broadcast::Receiver<RecordEvent>,
    missed: Arc<AtomicU64>,
}

impl EventStream {
    /// Wait for the next delivery; `None` once the bus is gone
    pub async fn next(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(RecvError::Lagged(missed)) => Some(self.gap(missed)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`EventStream::next`]
    pub fn try_next(&mut self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(TryRecvError::Lagged(missed)) => Some(self.gap(missed)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Turn the subscription into a lazy `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|delivery| (delivery, stream))
        })
    }

    fn gap(&self, missed: u64) -> Delivery {
        warn!("Event subscriber lagged, {} events discarded", missed);
        self.missed.fetch_add(missed, Ordering::Relaxed);
        metrics::counter!(metric_names::BUS_EVENTS_MISSED).increment(missed);
        Delivery::Gap { missed }
    }
}

/// Bus statistics
#[derive(Debug, Clone)]
pub struct BusStats {
    /// Total events published
    pub published: u64,

    /// Total events discarded across lagging subscribers
    pub missed: u64,

    /// Current subscriber count
    pub subscribers: usize,

    /// Per-subscriber buffer size
    pub capacity: usize,
}
