//! Subscriber connection state

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Connection lifecycle
///
/// ```text
/// Disconnected ──start()──► Connecting ──welcome──► Connected
///      ▲                        │                       │
///      └──── close / error ─────┴───────────────────────┘
///                  (retry after reconnect_delay)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Idle, or waiting out the reconnect delay
    Disconnected,
    /// Connect or handshake in progress
    Connecting,
    /// Handshake complete, receiving events
    Connected,
}

impl SubscriberState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SubscriberState::Connected)
    }
}

/// Reconnect bookkeeping, private to one subscriber
#[derive(Debug, Clone)]
pub struct ReconnectState {
    /// Hub address
    pub target_address: SocketAddr,
    /// Delay between attempts
    pub backoff: Duration,
    /// When the last attempt started
    pub last_attempt: Option<Instant>,
    /// Attempts since the last successful handshake
    pub failures: u32,
    /// Successful handshakes so far
    pub connections: u64,
}

impl ReconnectState {
    pub(super) fn new(target_address: SocketAddr, backoff: Duration) -> Self {
        Self {
            target_address,
            backoff,
            last_attempt: None,
            failures: 0,
            connections: 0,
        }
    }

    pub(super) fn attempt(&mut self) {
        self.last_attempt = Some(Instant::now());
    }

    pub(super) fn connected(&mut self) {
        self.failures = 0;
        self.connections += 1;
    }

    pub(super) fn failed(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }
}
