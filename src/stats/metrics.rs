//! Statistics and metrics
//!
//! Counters are plain relaxed atomics updated on the hot path; `snapshot()`
//! copies them into a value type for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Hub-level statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current live subscribers
    pub subscribers: usize,
    /// Subscribers ever registered
    pub total_accepted: u64,
    /// Events broadcast
    pub broadcasts: u64,
    /// Frames handed to subscriber queues
    pub deliveries: u64,
    /// Subscribers dropped because their queue was full or closed
    pub pruned: u64,
}

/// Live counters behind [`HubStats`]
#[derive(Debug, Default)]
pub struct HubCounters {
    total_accepted: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    pruned: AtomicU64,
}

impl HubCounters {
    pub fn record_accept(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, delivered: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, count: usize) {
        self.pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copy the counters out
    pub fn snapshot(&self, subscribers: usize) -> HubStats {
        HubStats {
            subscribers,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
        }
    }
}

/// Poller-level statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerStats {
    /// Completed fingerprint checks
    pub ticks: u64,
    /// Checks that found a change
    pub changes: u64,
    /// Reads skipped because they failed, timed out or overlapped a running read
    pub skipped: u64,
    /// Time since the poller was created
    pub uptime: Duration,
}

/// Live counters behind [`PollerStats`]
#[derive(Debug)]
pub struct PollerCounters {
    started_at: Instant,
    ticks: AtomicU64,
    changes: AtomicU64,
    skipped: AtomicU64,
}

impl PollerCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            ticks: AtomicU64::new(0),
            changes: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn record_tick(&self, changed: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.changes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> PollerStats {
        PollerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for PollerCounters {
    fn default() -> Self {
        Self::new()
    }
}
