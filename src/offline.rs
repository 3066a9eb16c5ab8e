use crate::error::StorageError;
use crate::event::Event;
use crate::storage::StorageDir;

const PENDING_LIST: &str = "pending.jsonl";

/// Durable holding area for events that could not be delivered.
///
/// Events are appended one JSON line at a time and only ever removed all
/// together, after the whole pending list has been delivered in one batch.
/// There is no in-memory fallback: if storage is unavailable the caller
/// gets the error and the event is lost.
#[derive(Debug, Clone)]
pub struct OfflineStore {
    storage: StorageDir,
}

impl OfflineStore {
    pub fn new(storage: StorageDir) -> Self {
        OfflineStore { storage }
    }

    /// Append an event to the pending list.
    pub fn persist(&self, event: &Event) -> Result<(), StorageError> {
        self.storage.append_line(PENDING_LIST, event)
    }

    /// Every pending event, oldest first.
    pub fn pending(&self) -> Result<Vec<Event>, StorageError> {
        self.storage.read_lines(PENDING_LIST)
    }

    /// Number of pending events.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Drop the whole pending list.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(PENDING_LIST)
    }
}
