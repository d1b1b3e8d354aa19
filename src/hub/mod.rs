//! Broadcast hub
//!
//! The hub owns the live subscriber set of a process and fans change events
//! out to it.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<BroadcastHub>
//!                     ┌─────────────────────────┐
//!                     │ subscribers: HashMap<Id,│
//!                     │   Subscription {        │
//!                     │     filter,             │
//!                     │     tx: mpsc::Sender,   │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │ snapshot senders (brief read lock)
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!    [worker #1]             [worker #2]             [worker #3]
//!    rx.recv()               rx.recv()               rx.recv()
//!         │                       │                       │
//!         └──► write_all() ──► TCP (one task per connection)
//! ```
//!
//! A subscriber whose queue is full or closed is removed on the spot; there
//! is no retry for a missed frame.

pub mod broadcast;
pub mod config;
mod connection;
pub mod listener;
pub mod subscription;

pub use broadcast::BroadcastHub;
pub use config::{HubConfig, DEFAULT_HUB_PORT};
pub use listener::{HubHandle, HubServer};
pub use subscription::{SubscriberId, SubscriberInfo};
