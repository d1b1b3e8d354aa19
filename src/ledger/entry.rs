//! Stock entry
//!
//! Per-item state stored in the ledger. Each entry sits behind its own lock
//! so unrelated items never contend.

use crate::event::{ItemId, StockChange};

use super::error::StockError;

/// Quantity and version of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockEntry {
    /// Item identifier
    pub item_id: ItemId,
    /// Units available
    pub quantity: u64,
    /// Bumped on every successful mutation
    pub version: u64,
}

impl StockEntry {
    pub(super) fn new(item_id: ItemId, quantity: u64) -> Self {
        Self {
            item_id,
            quantity,
            version: 0,
        }
    }

    /// Quantity left after taking `quantity` units
    pub(super) fn after_reserve(&self, quantity: u64) -> Result<u64, StockError> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity(self.item_id));
        }

        self.quantity
            .checked_sub(quantity)
            .ok_or(StockError::InsufficientStock {
                item: self.item_id,
                requested: quantity,
                available: self.quantity,
            })
    }

    /// Quantity after returning `quantity` units
    pub(super) fn after_release(&self, quantity: u64) -> Result<u64, StockError> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity(self.item_id));
        }

        self.quantity
            .checked_add(quantity)
            .ok_or(StockError::Overflow(self.item_id))
    }

    /// Apply a new quantity and bump the version
    pub(super) fn apply(&mut self, quantity: u64) -> StockChange {
        self.quantity = quantity;
        self.version += 1;

        StockChange {
            item_id: self.item_id,
            new_stock: self.quantity,
            version: self.version,
        }
    }
}
