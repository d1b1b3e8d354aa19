//! Subscription types
//!
//! Per-subscriber state stored in the hub.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::router::TopicFilter;

/// Unique identifier for a hub subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry for a single live subscriber
pub(super) struct Subscription {
    /// Hub-side pre-filter from the hello frame
    pub filter: TopicFilter,

    /// Queue drained by the subscriber's connection worker
    pub tx: mpsc::Sender<Bytes>,

    /// Remote peer address (None for in-process subscribers)
    pub peer: Option<SocketAddr>,

    /// When the subscriber registered
    pub connected_at: Instant,
}

impl Subscription {
    pub(super) fn new(filter: TopicFilter, tx: mpsc::Sender<Bytes>, peer: Option<SocketAddr>) -> Self {
        Self {
            filter,
            tx,
            peer,
            connected_at: Instant::now(),
        }
    }

    pub(super) fn info(&self, id: SubscriberId) -> SubscriberInfo {
        SubscriberInfo {
            id,
            filter: self.filter.clone(),
            peer: self.peer,
            connected_at: self.connected_at,
        }
    }
}

/// Read-only view of a subscriber
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    /// Subscriber id
    pub id: SubscriberId,
    /// Hub-side filter
    pub filter: TopicFilter,
    /// Remote peer address
    pub peer: Option<SocketAddr>,
    /// When the subscriber registered
    pub connected_at: Instant,
}
