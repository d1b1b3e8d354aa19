//! Change events and their wire encoding
//!
//! Every component speaks in [`ChangeEvent`]s: the ledger produces them on
//! successful mutations, the poller and the notifier listener produce them
//! for out-of-band changes, and the hub fans them out to subscribers.

pub mod change;
pub mod codec;

pub use change::{ChangeEvent, ItemId, StockChange, TopicChange, STOCK_TOPIC};
pub use codec::{FrameReader, Route, WireMessage};

/// Destination for change events
///
/// Implementations must not block: `publish` is called from poll ticks and
/// listener loops that other work is waiting on.
pub trait EventSink: Send + Sync + 'static {
    /// Hand an event over for delivery
    fn publish(&self, event: &ChangeEvent);
}

impl<F> EventSink for F
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    fn publish(&self, event: &ChangeEvent) {
        self(event)
    }
}
