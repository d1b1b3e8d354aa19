//! Change event types
//!
//! This module defines the key types for identifying stock items and the
//! immutable events that are fanned out to subscribers.

use std::borrow::Cow;

use bytes::Bytes;

use super::codec::{self, WireMessage};
use crate::error::Result;

/// Topic used for every event produced by the stock ledger
pub const STOCK_TOPIC: &str = "stock";

/// Unique identifier for a stock item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        ItemId(id)
    }
}

/// New stock level after a successful ledger mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    /// Item that changed
    pub item_id: ItemId,
    /// Quantity after the mutation
    pub new_stock: u64,
    /// Entry version after the mutation
    pub version: u64,
}

/// Generic "something in this topic changed" notification
#[derive(Debug, Clone, PartialEq)]
pub struct TopicChange {
    /// Topic name (usually a collection name)
    pub topic: String,
    /// Optional scope inside the topic (e.g. a shop identifier)
    pub scope_key: Option<String>,
    /// Opaque application payload
    pub payload: Option<serde_json::Value>,
}

/// An event to be broadcast to subscribers
///
/// Immutable once built; the hub encodes it once and shares the encoded
/// frame between all subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Stock level changed through the ledger
    Stock(StockChange),
    /// Anything else, detected by polling or announced by a sibling process
    Topic(TopicChange),
}

impl ChangeEvent {
    /// Create a stock event
    pub fn stock(item_id: ItemId, new_stock: u64, version: u64) -> Self {
        ChangeEvent::Stock(StockChange {
            item_id,
            new_stock,
            version,
        })
    }

    /// Create an unscoped topic event
    pub fn topic(topic: impl Into<String>) -> Self {
        ChangeEvent::Topic(TopicChange {
            topic: topic.into(),
            scope_key: None,
            payload: None,
        })
    }

    /// Create a topic event restricted to a scope
    pub fn scoped(topic: impl Into<String>, scope_key: impl Into<String>) -> Self {
        ChangeEvent::Topic(TopicChange {
            topic: topic.into(),
            scope_key: Some(scope_key.into()),
            payload: None,
        })
    }

    /// Attach a payload. Stock events carry their data in typed fields and
    /// are returned unchanged.
    pub fn with_payload(self, payload: serde_json::Value) -> Self {
        match self {
            ChangeEvent::Topic(mut change) => {
                change.payload = Some(payload);
                ChangeEvent::Topic(change)
            }
            stock => stock,
        }
    }

    /// Topic this event belongs to
    pub fn topic_name(&self) -> &str {
        match self {
            ChangeEvent::Stock(_) => STOCK_TOPIC,
            ChangeEvent::Topic(change) => &change.topic,
        }
    }

    /// Scope key; stock events are scoped by item id
    pub fn scope_key(&self) -> Option<Cow<'_, str>> {
        match self {
            ChangeEvent::Stock(change) => Some(Cow::Owned(change.item_id.to_string())),
            ChangeEvent::Topic(change) => change.scope_key.as_deref().map(Cow::Borrowed),
        }
    }

    /// Encode into a single newline-terminated frame
    pub fn encode(&self) -> Result<Bytes> {
        codec::encode(&WireMessage::from(self))
    }

    /// Get the stock change if this is a stock event
    pub fn as_stock(&self) -> Option<&StockChange> {
        match self {
            ChangeEvent::Stock(change) => Some(change),
            ChangeEvent::Topic(_) => None,
        }
    }
}
