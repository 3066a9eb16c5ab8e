use crate::error::StorageError;
use crate::storage::StorageDir;

const LEDGER_DOC: &str = "tracked_orders.json";

/// Default number of order ids remembered.
pub const DEFAULT_LEDGER_CAPACITY: usize = 50;

/// Durable, bounded record of order ids already reported as purchases.
///
/// Each order id moves one way, from unseen to tracked. Only the
/// `capacity` most recently tracked ids are kept; once an id is evicted a
/// later purchase for it is reported again.
///
/// The ledger is re-read from storage on every call, so two pipelines
/// sharing a storage directory see each other's writes (last writer wins
/// on concurrent updates).
#[derive(Debug, Clone)]
pub struct DedupLedger {
    storage: StorageDir,
    capacity: usize,
}

impl DedupLedger {
    pub fn new(storage: StorageDir, capacity: usize) -> Self {
        DedupLedger {
            storage,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a purchase for `order_id` has already been reported.
    pub fn is_tracked(&self, order_id: &str) -> Result<bool, StorageError> {
        Ok(self.tracked()?.iter().any(|id| id == order_id))
    }

    /// Record `order_id` as tracked, evicting the oldest ids beyond
    /// capacity.
    pub fn mark_tracked(&self, order_id: &str) -> Result<(), StorageError> {
        let mut ids = self.tracked()?;
        if ids.iter().any(|id| id == order_id) {
            return Ok(());
        }
        ids.push(order_id.to_string());
        if ids.len() > self.capacity {
            let excess = ids.len() - self.capacity;
            ids.drain(..excess);
        }
        self.storage.save_document(LEDGER_DOC, &ids)
    }

    /// Tracked ids, oldest first.
    pub fn tracked(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .storage
            .load_document::<Vec<String>>(LEDGER_DOC)?
            .unwrap_or_default())
    }
}
