//! Ledger error types
//!
//! These are ordinary outcomes, not faults: callers are expected to branch
//! on them.

use thiserror::Error;

use crate::event::ItemId;

/// Error type for ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    /// Item is not in the ledger
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    /// Not enough stock to cover the reservation
    #[error("Insufficient stock for item {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: ItemId,
        requested: u64,
        available: u64,
    },

    /// Zero-quantity reserve or release
    #[error("Quantity must be positive for item {0}")]
    InvalidQuantity(ItemId),

    /// Release would overflow the quantity counter
    #[error("Quantity overflow for item {0}")]
    Overflow(ItemId),
}

impl StockError {
    /// Whether this is a declined reservation rather than a caller mistake
    pub fn is_declined(&self) -> bool {
        matches!(self, StockError::InsufficientStock { .. })
    }

    /// Item the error refers to
    pub fn item(&self) -> ItemId {
        match self {
            StockError::NotFound(item)
            | StockError::InvalidQuantity(item)
            | StockError::Overflow(item) => *item,
            StockError::InsufficientStock { item, .. } => *item,
        }
    }
}
