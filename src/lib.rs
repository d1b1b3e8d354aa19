//! Real-time inventory synchronization
//!
//! Keeps every process and every connected client looking at the same stock
//! levels:
//!
//! - [`ledger`]: atomic reserve/release per item, one event per mutation
//! - [`poller`]: fingerprint-based detection of writes made elsewhere
//! - [`notify`]: loopback datagrams that tell sibling processes a topic changed
//! - [`hub`]: TCP fan-out of change events to live subscribers
//! - [`subscriber`]: hub client that reconnects on its own
//! - [`router`]: topic/scope filtering before events reach the application
//! - [`engine`]: wires all of the above together for one process
//!
//! # Example
//! ```no_run
//! use stock_sync::engine::{Engine, EngineConfig};
//! use stock_sync::event::ItemId;
//! use stock_sync::router::{TopicFilter, TopicRouter};
//!
//! # async fn example() -> stock_sync::Result<()> {
//! let engine = Engine::start(EngineConfig::default()).await?;
//! engine.ledger().insert(ItemId(42), 3);
//!
//! let router = TopicRouter::from_filter(TopicFilter::scoped("stock", "42"));
//! let _subscriber = engine.subscribe(router, |event| println!("{:?}", event))?;
//!
//! match engine.ledger().reserve(ItemId(42), 1) {
//!     Ok(change) => println!("{} left", change.new_stock),
//!     Err(e) if e.is_declined() => println!("sold out"),
//!     Err(e) => return Err(stock_sync::Error::Protocol(e.to_string())),
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod event;
pub mod hub;
pub mod ledger;
pub mod notify;
pub mod poller;
pub mod router;
pub mod stats;
pub mod subscriber;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use event::{ChangeEvent, EventSink, ItemId};
pub use hub::{BroadcastHub, HubConfig, HubServer};
pub use ledger::{StockError, StockLedger};
pub use notify::{Notifier, NotifierConfig, NotifyListener};
pub use poller::{ChangePoller, Collection, WatchConfig};
pub use router::{TopicFilter, TopicRouter};
pub use subscriber::{ResilientSubscriber, SubscriberConfig, SubscriberState};
