//! Cross-process notifier
//!
//! Lets one process tell its siblings on the same host "topic X changed"
//! without waiting for their next poll tick. Datagrams carry the bare topic
//! name as UTF-8 text and only ever travel over loopback.

pub mod config;
pub mod listener;
pub mod sender;

pub use config::{NotifierConfig, DEFAULT_NOTIFY_PORT};
pub use listener::NotifyListener;
pub use sender::Notifier;
