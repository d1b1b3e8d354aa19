//! Topic routing
//!
//! Keeps subscribers from reacting to events they do not care about. The
//! decision is made from the routing envelope alone (topic + scope key),
//! so the payload is only decoded for events that pass.

use crate::error::Result;
use crate::event::codec::{self, Route};
use crate::event::ChangeEvent;

/// Topic/scope filter
///
/// `None` fields match anything. An event without a scope key passes a
/// scoped filter: it announces a change the sender could not narrow down,
/// which may concern every scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter {
    /// Required topic
    pub topic: Option<String>,
    /// Required scope key
    pub scope_key: Option<String>,
}

impl TopicFilter {
    /// Match every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one topic, any scope
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            scope_key: None,
        }
    }

    /// Match one topic within one scope
    pub fn scoped(topic: impl Into<String>, scope_key: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            scope_key: Some(scope_key.into()),
        }
    }

    /// Check whether an event with this topic and scope passes
    pub fn matches(&self, topic: &str, scope_key: Option<&str>) -> bool {
        if let Some(ref wanted) = self.topic {
            if wanted != topic {
                return false;
            }
        }

        match (&self.scope_key, scope_key) {
            (Some(wanted), Some(scope)) => wanted == scope,
            _ => true,
        }
    }

    /// Check whether an event passes
    pub fn matches_event(&self, event: &ChangeEvent) -> bool {
        self.matches(event.topic_name(), event.scope_key().as_deref())
    }

    /// Check if this filter matches everything
    pub fn is_all(&self) -> bool {
        self.topic.is_none() && self.scope_key.is_none()
    }
}

type Predicate = Box<dyn Fn(&str, Option<&str>) -> bool + Send + Sync>;

/// Filtering layer between a subscriber connection and application logic
pub struct TopicRouter {
    predicate: Predicate,
}

impl TopicRouter {
    /// Create a router from an application predicate over `(topic, scope_key)`
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&str, Option<&str>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Router that lets every event through
    pub fn accept_all() -> Self {
        Self::new(|_, _| true)
    }

    /// Router for a single filter
    pub fn from_filter(filter: TopicFilter) -> Self {
        Self::new(move |topic, scope| filter.matches(topic, scope))
    }

    /// Router that passes events matching any of the filters
    pub fn any_of(filters: Vec<TopicFilter>) -> Self {
        Self::new(move |topic, scope| filters.iter().any(|f| f.matches(topic, scope)))
    }

    /// Check a topic/scope pair
    pub fn accepts(&self, topic: &str, scope_key: Option<&str>) -> bool {
        (self.predicate)(topic, scope_key)
    }

    /// Route a raw frame
    ///
    /// Returns `Ok(None)` for control frames and for events the predicate
    /// rejects; only accepted events are fully decoded.
    pub fn route(&self, frame: &[u8]) -> Result<Option<ChangeEvent>> {
        match codec::decode_route(frame)? {
            Route::Control => Ok(None),
            Route::Event { topic, scope_key } => {
                if !self.accepts(&topic, scope_key.as_deref()) {
                    tracing::trace!(topic = %topic, scope = ?scope_key, "Event filtered out");
                    return Ok(None);
                }
                Ok(codec::decode(frame)?.into_event())
            }
        }
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl From<TopicFilter> for TopicRouter {
    fn from(filter: TopicFilter) -> Self {
        Self::from_filter(filter)
    }
}
