use crate::event::Event;
use std::collections::VecDeque;

/// Default number of events per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// In-memory FIFO of events waiting for a batch delivery.
///
/// Not persisted; whatever is left when the pipeline goes away is either
/// flushed or lost.
///
/// The queue has no upper bound. While offline, or while the endpoint keeps
/// failing, every batch taken from it is put back, so it grows by one event
/// per tracked event for the rest of the session. Against a failing endpoint
/// each push past `batch_size` also costs one more request attempt.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Event>,
    batch_size: usize,
}

impl EventQueue {
    pub fn new(batch_size: usize) -> Self {
        EventQueue {
            events: VecDeque::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append to the tail. Returns `true` once the queue holds a full batch.
    pub fn push(&mut self, event: Event) -> bool {
        self.events.push_back(event);
        self.events.len() >= self.batch_size
    }

    /// Remove up to one batch from the head.
    pub fn take_batch(&mut self) -> Vec<Event> {
        let n = self.batch_size.min(self.events.len());
        self.events.drain(..n).collect()
    }

    /// Put a failed batch back at the head, preserving its order.
    pub fn requeue_front(&mut self, batch: Vec<Event>) {
        for event in batch.into_iter().rev() {
            self.events.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}
