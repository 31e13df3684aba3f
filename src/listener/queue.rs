//! Bounded hand-off between frame dispatch and the consumer
//!
//! Producers push through a cloneable [`EventSink`]; the listener pulls with
//! non-blocking dequeues. A full queue makes a producer wait for at most the
//! configured enqueue timeout, after which the event is dropped and counted.

use crate::events::DomainEvent;
use crate::observability::metrics;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

/// Result of handing one event to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Queue stayed full for the whole enqueue timeout
    Dropped,
    /// The consuming side is gone
    Closed,
}

/// Producer side of the [`EventQueue`]
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<DomainEvent>,
    enqueue_timeout: Duration,
}

impl EventSink {
    /// Enqueue an event, waiting briefly for room when the queue is full
    pub async fn enqueue(&self, event: DomainEvent) -> EnqueueOutcome {
        let kind = event.kind();
        let event = match self.tx.try_send(event) {
            Ok(()) => return EnqueueOutcome::Enqueued,
            Err(TrySendError::Closed(_)) => return EnqueueOutcome::Closed,
            Err(TrySendError::Full(event)) => event,
        };

        debug!(kind, "Event queue full, waiting for room");
        match tokio::time::timeout(self.enqueue_timeout, self.tx.send(event)).await {
            Ok(Ok(())) => EnqueueOutcome::Enqueued,
            Ok(Err(_)) => EnqueueOutcome::Closed,
            Err(_) => {
                warn!(
                    kind,
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "Event queue full, dropping event"
                );
                metrics().event_dropped();
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Room left in the queue right now
    pub fn free_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Bounded FIFO of domain events
#[derive(Debug)]
pub struct EventQueue {
    tx: mpsc::Sender<DomainEvent>,
    rx: mpsc::Receiver<DomainEvent>,
    capacity: usize,
    enqueue_timeout: Duration,
}

impl EventQueue {
    /// Create a queue; a zero capacity is raised to one
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx,
            capacity,
            enqueue_timeout,
        }
    }

    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
            enqueue_timeout: self.enqueue_timeout,
        }
    }

    /// Take the oldest queued event without waiting
    pub fn try_dequeue(&mut self) -> Option<DomainEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            // Unreachable while the queue holds its own sender
            Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_capacity(&self) -> usize {
        self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
