//! Stock ledger
//!
//! Authoritative item -> quantity store with atomic reserve/release.
//!
//! # Locking
//!
//! ```text
//!              StockLedger
//!     ┌──────────────────────────────┐
//!     │ items: RwLock<HashMap<Id,    │   map lock: lookup / insert only
//!     │   Arc<Mutex<StockEntry>>>>   │
//!     └──────────────┬───────────────┘
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!    Mutex(#1)   Mutex(#2)   Mutex(#42)     item lock: check + subtract + enqueue
//!                                │
//!                                └──► events (unbounded mpsc) ──► hub / notifier
//! ```
//!
//! The event is enqueued while the item lock is still held, so events for a
//! single item leave the ledger in version order. The enqueue is a
//! memory-only push; no I/O happens under either lock.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::StockEntry;
pub use error::StockError;
pub use store::{LedgerEvents, StockLedger};
