//! Stock ledger implementation
//!
//! The authoritative item -> quantity store. Mutations are a memory-only
//! compare-and-subtract under a per-item lock; the outer map lock is only
//! held long enough to look up (or insert) the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::entry::StockEntry;
use super::error::StockError;
use crate::event::{ChangeEvent, ItemId, StockChange};

/// Receiving end of the ledger's change events
pub type LedgerEvents = mpsc::UnboundedReceiver<ChangeEvent>;

/// Central stock ledger
///
/// Thread-safe; every method is synchronous and completes in bounded time.
pub struct StockLedger {
    /// Map of item id to its individually locked entry
    items: RwLock<HashMap<ItemId, Arc<Mutex<StockEntry>>>>,

    /// Total successful mutations, across all items
    revision: AtomicU64,

    /// Outgoing change events
    events: mpsc::UnboundedSender<ChangeEvent>,
}

impl StockLedger {
    /// Create an empty ledger
    ///
    /// Returns the ledger and the receiver for its change events. Every
    /// successful mutation enqueues exactly one event.
    pub fn new() -> (Self, LedgerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();

        let ledger = Self {
            items: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            events: tx,
        };

        (ledger, rx)
    }

    /// Seed an item or overwrite its quantity
    pub fn insert(&self, item: ItemId, quantity: u64) -> StockChange {
        let entry = {
            let mut items = self.items.write();
            Arc::clone(
                items
                    .entry(item)
                    .or_insert_with(|| Arc::new(Mutex::new(StockEntry::new(item, quantity)))),
            )
        };

        let mut guard = entry.lock();
        let change = guard.apply(quantity);
        self.emit(change);

        tracing::info!(item = %item, quantity = quantity, "Stock level set");
        change
    }

    /// Atomically take `quantity` units of an item
    ///
    /// `InsufficientStock` is a declined reservation, not a failure of the
    /// ledger; the entry is left untouched.
    pub fn reserve(&self, item: ItemId, quantity: u64) -> Result<StockChange, StockError> {
        let result = self.mutate(item, |entry| entry.after_reserve(quantity));

        match &result {
            Ok(change) => tracing::debug!(
                item = %item,
                quantity = quantity,
                new_stock = change.new_stock,
                "Stock reserved"
            ),
            Err(e) if e.is_declined() => {
                tracing::debug!(item = %item, quantity = quantity, "Reservation declined")
            }
            Err(e) => tracing::debug!(item = %item, error = %e, "Reservation rejected"),
        }

        result
    }

    /// Atomically return `quantity` units of an item
    pub fn release(&self, item: ItemId, quantity: u64) -> Result<StockChange, StockError> {
        let result = self.mutate(item, |entry| entry.after_release(quantity));

        if let Ok(change) = &result {
            tracing::debug!(
                item = %item,
                quantity = quantity,
                new_stock = change.new_stock,
                "Stock released"
            );
        }

        result
    }

    /// Current quantity of an item
    pub fn read(&self, item: ItemId) -> Result<u64, StockError> {
        Ok(self.entry(item)?.lock().quantity)
    }

    /// Full entry for an item
    pub fn snapshot(&self, item: ItemId) -> Option<StockEntry> {
        self.entry(item).ok().map(|entry| *entry.lock())
    }

    /// All item ids, sorted
    pub fn items(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Check if the ledger has no items
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Number of successful mutations so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn entry(&self, item: ItemId) -> Result<Arc<Mutex<StockEntry>>, StockError> {
        self.items
            .read()
            .get(&item)
            .cloned()
            .ok_or(StockError::NotFound(item))
    }

    fn mutate<F>(&self, item: ItemId, next_quantity: F) -> Result<StockChange, StockError>
    where
        F: FnOnce(&StockEntry) -> Result<u64, StockError>,
    {
        let entry = self.entry(item)?;
        let mut guard = entry.lock();

        let quantity = next_quantity(&guard)?;
        let change = guard.apply(quantity);

        // Still under the item lock: events for one item leave in version order
        self.emit(change);

        Ok(change)
    }

    fn emit(&self, change: StockChange) {
        self.revision.fetch_add(1, Ordering::AcqRel);

        // A dropped receiver just means nobody is listening
        let _ = self.events.send(ChangeEvent::Stock(change));
    }
}
