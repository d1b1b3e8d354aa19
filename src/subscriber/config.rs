//! Subscriber configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::event::codec::DEFAULT_MAX_FRAME_LEN;
use crate::router::TopicFilter;

/// Resilient subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Hub to connect to
    pub hub_addr: SocketAddr,

    /// Limit for TCP connect plus the hello/welcome exchange
    pub connect_timeout: Duration,

    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,

    /// Silence after which the connection is considered dead
    ///
    /// Should exceed the hub heartbeat interval. `None` waits forever.
    pub idle_timeout: Option<Duration>,

    /// Filter sent to the hub in the hello frame
    pub filter: TopicFilter,

    /// Maximum inbound frame length
    pub max_frame_len: usize,

    /// Set TCP_NODELAY on the connection
    pub tcp_nodelay: bool,
}

impl SubscriberConfig {
    /// Connect to a hub with default settings
    pub fn new(hub_addr: SocketAddr) -> Self {
        Self {
            hub_addr,
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(45)),
            filter: TopicFilter::all(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            tcp_nodelay: true,
        }
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Never time out an idle connection
    pub fn no_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Ask the hub to pre-filter events
    pub fn filter(mut self, filter: TopicFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the maximum inbound frame length
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect_timeout must be non-zero".into()));
        }
        if self.reconnect_delay.is_zero() {
            return Err(Error::Config("reconnect_delay must be non-zero".into()));
        }
        if self.idle_timeout.map_or(false, |t| t.is_zero()) {
            return Err(Error::Config("idle_timeout must be non-zero".into()));
        }
        if self.max_frame_len == 0 {
            return Err(Error::Config("max_frame_len must be non-zero".into()));
        }
        Ok(())
    }
}
