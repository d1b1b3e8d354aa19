//! Per-collection watch configuration

use std::time::Duration;

use crate::error::{Error, Result};

/// Cadence for collections without special latency needs
pub const GENERAL_INTERVAL: Duration = Duration::from_secs(3);

/// Cadence for collections that back stock levels
pub const STOCK_SENSITIVE_INTERVAL: Duration = Duration::from_millis(500);

/// How one collection is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Time between fingerprint checks
    pub interval: Duration,
    /// Longest a single fingerprint read may take before the tick is skipped
    pub read_timeout: Duration,
}

impl WatchConfig {
    /// Watch with a custom cadence; the read timeout matches the interval
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            read_timeout: interval,
        }
    }

    /// 3 second cadence
    pub fn general() -> Self {
        Self::every(GENERAL_INTERVAL)
    }

    /// 500 ms cadence
    pub fn stock_sensitive() -> Self {
        Self::every(STOCK_SENSITIVE_INTERVAL)
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::general()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(WatchConfig::general().interval, Duration::from_secs(3));
        assert_eq!(WatchConfig::stock_sensitive().interval, Duration::from_millis(500));
        assert_eq!(WatchConfig::default(), WatchConfig::general());
    }

    #[test]
    fn test_builder() {
        let config = WatchConfig::every(Duration::from_millis(100)).read_timeout(Duration::from_millis(20));

        assert_eq!(config.interval, Duration::from_millis(100));
        assert_eq!(config.read_timeout, Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(WatchConfig::every(Duration::ZERO).validate().is_err());
        assert!(WatchConfig::general()
            .read_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
