//! Notification sender
//!
//! Fire-and-forget datagrams carrying a bare topic name.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::config::NotifierConfig;
use crate::error::Result;
use crate::event::{ChangeEvent, EventSink};

/// Tells sibling processes that a topic changed
pub struct Notifier {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    max_topic_len: usize,
}

impl Notifier {
    /// Bind an ephemeral loopback socket for sending
    pub async fn bind(config: &NotifierConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(SocketAddr::new(config.listen_addr.ip(), 0)).await?;
        let peers = config.remote_peers();

        tracing::debug!(peers = ?peers, "Notifier ready");

        Ok(Self {
            socket,
            peers,
            max_topic_len: config.max_topic_len,
        })
    }

    /// Peers that receive notifications
    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Best-effort notification
    ///
    /// Never blocks and never fails: a missing receiver, a full socket buffer
    /// or an oversized topic just means nothing is sent.
    pub fn notify(&self, topic: &str) {
        if topic.is_empty() || topic.len() > self.max_topic_len {
            tracing::warn!(len = topic.len(), "Notification topic rejected");
            return;
        }

        for peer in &self.peers {
            if let Err(e) = self.socket.try_send_to(topic.as_bytes(), *peer) {
                tracing::trace!(peer = %peer, topic = topic, error = %e, "Notification not sent");
            }
        }
    }
}

impl EventSink for Notifier {
    fn publish(&self, event: &ChangeEvent) {
        self.notify(event.topic_name());
    }
}
