//! Change poller
//!
//! Catches mutations the ledger did not originate, such as writes from an
//! admin tool or another process. Each watched collection is fingerprinted
//! on its own cadence:
//!
//! ```text
//! tick ──► fingerprint() ──► same as cache? ──yes──► nothing
//!           (blocking pool,        │
//!            with timeout)         no
//!                                  ▼
//!                       update cache, publish ChangeEvent(topic = name)
//! ```
//!
//! Push notifications call [`ChangePoller::refresh`] so the next tick does
//! not report the same change twice.

pub mod collection;
pub mod config;
pub mod watcher;

pub use collection::{Collection, FileCollection, Fingerprint, MemoryCollection};
pub use config::WatchConfig;
pub use watcher::ChangePoller;
