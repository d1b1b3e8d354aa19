//! Resilient subscriber
//!
//! Connects to a broadcast hub, filters inbound events through a
//! [`TopicRouter`](crate::router::TopicRouter) and hands the survivors to an
//! application callback. Connection loss of any kind leads to a reconnect
//! after a fixed delay, forever, until [`ResilientSubscriber::stop`].

pub mod client;
pub mod config;
pub mod state;

pub use client::{Callback, ResilientSubscriber};
pub use config::SubscriberConfig;
pub use state::{ReconnectState, SubscriberState};
