//! Hub configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::event::codec::DEFAULT_MAX_FRAME_LEN;

/// Default hub port
pub const DEFAULT_HUB_PORT: u16 = 47_900;

/// Broadcast hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum live subscribers (0 = unlimited)
    pub max_subscribers: usize,

    /// Frames queued per subscriber before it is dropped as too slow
    pub subscriber_buffer: usize,

    /// Hello must arrive within this time after accept
    pub handshake_timeout: Duration,

    /// Ping cadence (zero disables heartbeats)
    pub heartbeat_interval: Duration,

    /// Longest frame accepted from a subscriber
    pub max_frame_len: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_HUB_PORT)),
            max_subscribers: 0, // Unlimited
            subscriber_buffer: 256,
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            tcp_nodelay: true, // Events are tiny and latency-sensitive
        }
    }
}

impl HubConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum subscribers
    pub fn max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Set per-subscriber queue length
    pub fn subscriber_buffer(mut self, frames: usize) -> Self {
        self.subscriber_buffer = frames;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Disable heartbeats
    pub fn disable_heartbeat(mut self) -> Self {
        self.heartbeat_interval = Duration::ZERO;
        self
    }

    /// Set maximum inbound frame length
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Check the configuration before binding
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_buffer == 0 {
            return Err(Error::Config("subscriber_buffer must be at least 1".into()));
        }
        if self.max_frame_len == 0 {
            return Err(Error::Config("max_frame_len must be at least 1".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config("handshake_timeout must be non-zero".into()));
        }
        Ok(())
    }
}
