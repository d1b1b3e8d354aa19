//! Statistics for the hub and the poller

pub mod metrics;

pub use metrics::{HubCounters, HubStats, PollerCounters, PollerStats};
