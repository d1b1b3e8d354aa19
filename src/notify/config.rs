//! Notifier configuration

use std::net::SocketAddr;

use crate::error::{Error, Result};

/// Well-known loopback port for cross-process notifications
pub const DEFAULT_NOTIFY_PORT: u16 = 47_901;

/// Cross-process notifier configuration options
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Loopback address this process listens on
    pub listen_addr: SocketAddr,

    /// Loopback addresses of sibling processes to notify
    pub peers: Vec<SocketAddr>,

    /// Longest topic name accepted or sent
    pub max_topic_len: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        let well_known = SocketAddr::from(([127, 0, 0, 1], DEFAULT_NOTIFY_PORT));
        Self {
            listen_addr: well_known,
            peers: vec![well_known],
            max_topic_len: 256,
        }
    }
}

impl NotifierConfig {
    /// Set the listen address
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Replace the peer list
    pub fn peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.peers = peers;
        self
    }

    /// Add a peer
    pub fn peer(mut self, addr: SocketAddr) -> Self {
        self.peers.push(addr);
        self
    }

    /// Set the topic length limit
    pub fn max_topic_len(mut self, len: usize) -> Self {
        self.max_topic_len = len;
        self
    }

    /// Peers minus our own listen address
    pub fn remote_peers(&self) -> Vec<SocketAddr> {
        self.peers
            .iter()
            .copied()
            .filter(|peer| *peer != self.listen_addr)
            .collect()
    }

    /// The channel is local-host only: every address must be loopback
    pub fn validate(&self) -> Result<()> {
        if !self.listen_addr.ip().is_loopback() {
            return Err(Error::Config(format!(
                "notifier must listen on loopback, got {}",
                self.listen_addr
            )));
        }

        if let Some(peer) = self.peers.iter().find(|p| !p.ip().is_loopback()) {
            return Err(Error::Config(format!(
                "notifier peers must be loopback, got {}",
                peer
            )));
        }

        if self.max_topic_len == 0 {
            return Err(Error::Config("max_topic_len must be at least 1".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NotifierConfig::default();

        assert_eq!(config.listen_addr.port(), DEFAULT_NOTIFY_PORT);
        assert!(config.validate().is_ok());
        // Default peer is ourselves, which is never notified
        assert!(config.remote_peers().is_empty());
    }

    #[test]
    fn test_remote_peers_excludes_self() {
        let own: SocketAddr = "127.0.0.1:47901".parse().unwrap();
        let sibling: SocketAddr = "127.0.0.1:47902".parse().unwrap();
        let config = NotifierConfig::default().listen(own).peer(sibling);

        assert_eq!(config.remote_peers(), vec![sibling]);
    }

    #[test]
    fn test_rejects_non_loopback_listen() {
        let config = NotifierConfig::default().listen("0.0.0.0:47901".parse().unwrap());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_non_loopback_peer() {
        let config = NotifierConfig::default().peer("192.168.1.10:47901".parse().unwrap());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_ipv6_loopback_allowed() {
        let config = NotifierConfig::default()
            .listen("[::1]:47901".parse().unwrap())
            .peers(vec!["[::1]:47902".parse().unwrap()]);
        assert!(config.validate().is_ok());
    }
}
