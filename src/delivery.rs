//! Routing of events to the ingestion endpoint.
//!
//! Three paths:
//!
//! - single: one event per request, used for critical and lifecycle events;
//!   failures go to the [`OfflineStore`];
//! - batch: up to `batch_size` queued events as `{"events": [...]}`;
//!   failures go back to the front of the [`EventQueue`] for the next flush;
//! - pending: the whole offline store as one batch, cleared only when the
//!   request succeeds.
//!
//! No path retries synchronously. Every failure is settled in
//! [`DeliveryEngine::settle`].

use crate::config::TrackerConfig;
use crate::error::TransportError;
use crate::event::Event;
use crate::offline::OfflineStore;
use crate::queue::EventQueue;
use crate::storage::StorageDir;
use crate::transport::{Connectivity, Transport};
use serde::Serialize;
use std::sync::Arc;

/// What happened to an event or batch handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the transport.
    Sent,
    /// Appended to the batch queue, which is still below a full batch.
    Queued,
    /// Nothing to deliver.
    Empty,
    /// Written to the offline store after a failed single send.
    Persisted,
    /// Put back at the front of the queue after a failed batch send.
    Requeued,
    /// Left in the offline store for a later flush.
    Retained,
    /// Neither delivered nor stored.
    Dropped,
    /// Handed to a background delivery worker, which settles the outcome.
    Dispatched,
}

/// Where a pipeline sends the events it admits.
///
/// [`DeliveryEngine`] delivers on the calling thread. The tracker routes
/// through a handle to its delivery worker instead, so callers never wait
/// on the transport.
pub trait Router: Send {
    fn enqueue(&mut self, event: Event) -> Delivery;
    fn send_single(&mut self, event: Event) -> Delivery;
    fn flush(&mut self) -> Delivery;
    fn flush_pending(&mut self) -> Delivery;
}

#[derive(Serialize)]
struct BatchBody<'a> {
    events: &'a [Event],
}

enum Failure {
    Single { event: Event, error: TransportError },
    Batch { events: Vec<Event>, error: TransportError },
    Pending { count: usize, error: TransportError },
}

pub struct DeliveryEngine {
    transport: Box<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    queue: EventQueue,
    offline: OfflineStore,
}

impl DeliveryEngine {
    pub fn new(
        transport: Box<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
        queue: EventQueue,
        offline: OfflineStore,
    ) -> Self {
        DeliveryEngine {
            transport,
            connectivity,
            queue,
            offline,
        }
    }

    /// Engine over the configured storage directory and batch size.
    pub fn from_config(
        config: &TrackerConfig,
        transport: Box<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let storage = StorageDir::new(&config.storage_dir);
        DeliveryEngine::new(
            transport,
            connectivity,
            EventQueue::new(config.batch_size),
            OfflineStore::new(storage),
        )
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn offline(&self) -> &OfflineStore {
        &self.offline
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Route an event: critical events go out on their own, everything else
    /// waits in the queue until a full batch has accumulated.
    pub fn enqueue(&mut self, event: Event) -> Delivery {
        if event.event_type().is_critical() {
            return self.send_single(event);
        }
        if self.queue.push(event) {
            let batch = self.queue.take_batch();
            return self.send_batch(batch);
        }
        Delivery::Queued
    }

    /// Drain the queue batch by batch. Stops at the first batch that fails,
    /// which is back at the head of the queue afterwards.
    pub fn flush(&mut self) -> Delivery {
        let mut outcome = Delivery::Empty;
        while !self.queue.is_empty() {
            let batch = self.queue.take_batch();
            outcome = self.send_batch(batch);
            if outcome != Delivery::Sent {
                break;
            }
        }
        outcome
    }

    /// Send one event immediately.
    pub fn send_single(&mut self, event: Event) -> Delivery {
        let result = if self.is_online() {
            serde_json::to_vec(&event)
                .map_err(TransportError::from)
                .and_then(|body| self.transport.post(&body))
        } else {
            Err(TransportError::Offline)
        };

        match result {
            Ok(()) => Delivery::Sent,
            Err(error) => self.settle(Failure::Single { event, error }),
        }
    }

    /// Send a list of events as one `{"events": [...]}` request.
    pub fn send_batch(&mut self, events: Vec<Event>) -> Delivery {
        if events.is_empty() {
            return Delivery::Empty;
        }
        let result = if self.is_online() {
            self.post_batch(&events)
        } else {
            Err(TransportError::Offline)
        };

        match result {
            Ok(()) => {
                log::debug!("shoptrace: sent batch of {} events", events.len());
                Delivery::Sent
            }
            Err(error) => self.settle(Failure::Batch { events, error }),
        }
    }

    /// Deliver the offline store as one batch and clear it on success.
    pub fn flush_pending(&mut self) -> Delivery {
        if !self.is_online() {
            log::info!("shoptrace: still offline, pending events stay stored");
            return Delivery::Retained;
        }

        let pending = match self.offline.pending() {
            Ok(pending) => pending,
            Err(e) => {
                log::warn!("shoptrace: cannot read pending events: {e}");
                return Delivery::Retained;
            }
        };
        if pending.is_empty() {
            return Delivery::Empty;
        }

        match self.post_batch(&pending) {
            Ok(()) => {
                log::info!("shoptrace: sent {} pending events", pending.len());
                if let Err(e) = self.offline.clear() {
                    log::warn!("shoptrace: delivered pending events but cannot clear them: {e}");
                }
                Delivery::Sent
            }
            Err(error) => self.settle(Failure::Pending {
                count: pending.len(),
                error,
            }),
        }
    }

    fn post_batch(&mut self, events: &[Event]) -> Result<(), TransportError> {
        let body = serde_json::to_vec(&BatchBody { events })?;
        self.transport.post(&body)
    }

    /// Single place where a failed delivery is turned into a degraded
    /// outcome. Nothing is re-raised.
    fn settle(&mut self, failure: Failure) -> Delivery {
        match failure {
            Failure::Single { event, error } => {
                report(&error, "event");
                match self.offline.persist(&event) {
                    Ok(()) => Delivery::Persisted,
                    Err(e) => {
                        log::warn!(
                            "shoptrace: cannot store {} event {} offline, dropping it: {e}",
                            event.event_type(),
                            event.event_id()
                        );
                        Delivery::Dropped
                    }
                }
            }
            Failure::Batch { events, error } => {
                report(&error, "batch");
                self.queue.requeue_front(events);
                Delivery::Requeued
            }
            Failure::Pending { count, error } => {
                report(&error, "pending events");
                log::debug!("shoptrace: {count} events remain in the offline store");
                Delivery::Retained
            }
        }
    }
}

impl Router for DeliveryEngine {
    fn enqueue(&mut self, event: Event) -> Delivery {
        DeliveryEngine::enqueue(self, event)
    }

    fn send_single(&mut self, event: Event) -> Delivery {
        DeliveryEngine::send_single(self, event)
    }

    fn flush(&mut self) -> Delivery {
        DeliveryEngine::flush(self)
    }

    fn flush_pending(&mut self) -> Delivery {
        DeliveryEngine::flush_pending(self)
    }
}

fn report(error: &TransportError, what: &str) {
    if error.is_offline() {
        log::info!("shoptrace: offline, {what} held back");
    } else {
        log::error!("shoptrace: error sending {what}: {error}");
    }
}
