//! Notification receiver
//!
//! Listens on the loopback address and turns every datagram into a change
//! event, bypassing the poll cadence.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::config::NotifierConfig;
use crate::error::Result;
use crate::event::{ChangeEvent, EventSink};

/// Receiving side of the cross-process notifier
pub struct NotifyListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_topic_len: usize,
}

impl NotifyListener {
    /// Bind the loopback listen address
    ///
    /// Fails if the address is not loopback or is already taken.
    pub async fn bind(config: &NotifierConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(config.listen_addr).await?;
        let local_addr = socket.local_addr()?;
        tracing::info!(addr = %local_addr, "Notify listener bound");

        Ok(Self {
            socket,
            local_addr,
            max_topic_len: config.max_topic_len,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive notifications until the task is aborted
    pub async fn run(self, sink: Arc<dyn EventSink>) {
        let mut buf = vec![0u8; self.max_topic_len + 1];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // e.g. ICMP port unreachable reported on some platforms
                    tracing::debug!(error = %e, "Notify receive failed");
                    continue;
                }
            };

            if !from.ip().is_loopback() {
                tracing::warn!(from = %from, "Ignoring non-local notification");
                continue;
            }

            match parse_topic(&buf[..len], self.max_topic_len) {
                Some(topic) => {
                    tracing::debug!(topic = topic, from = %from, "Notification received");
                    sink.publish(&ChangeEvent::topic(topic));
                }
                None => tracing::debug!(from = %from, len = len, "Malformed notification"),
            }
        }
    }

    /// Spawn the receive loop
    pub fn spawn(self, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
        tokio::spawn(self.run(sink))
    }
}

fn parse_topic(datagram: &[u8], max_len: usize) -> Option<&str> {
    if datagram.len() > max_len {
        return None;
    }

    let topic = std::str::from_utf8(datagram).ok()?.trim();
    if topic.is_empty() || topic.chars().any(char::is_control) {
        return None;
    }

    Some(topic)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::error::Error;
    use crate::notify::Notifier;

    fn ephemeral() -> NotifierConfig {
        NotifierConfig::default()
            .listen("127.0.0.1:0".parse().unwrap())
            .peers(Vec::new())
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic(b"stock", 64), Some("stock"));
        assert_eq!(parse_topic(b" menu\n", 64), Some("menu"));
        assert_eq!(parse_topic(b"", 64), None);
        assert_eq!(parse_topic(b"a\x00b", 64), None);
        assert_eq!(parse_topic(&[0xff, 0xfe], 64), None);
        assert_eq!(parse_topic(b"toolong", 3), None);
    }

    #[tokio::test]
    async fn test_notify_reaches_listener() {
        let listener = NotifyListener::bind(&ephemeral()).await.unwrap();
        let addr = listener.local_addr();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(move |event: &ChangeEvent| {
            let _ = tx.send(event.clone());
        });
        let handle = listener.spawn(sink);

        let notifier = Notifier::bind(&ephemeral().peer(addr)).await.unwrap();
        notifier.notify("orders");

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ChangeEvent::topic("orders"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_notify_without_receiver_is_silent() {
        // Grab a free port and release it so nothing is listening there
        let placeholder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let vacant = placeholder.local_addr().unwrap();
        drop(placeholder);

        let notifier = Notifier::bind(&ephemeral().peer(vacant)).await.unwrap();
        notifier.notify("stock");
        notifier.notify("stock");
        notifier.notify("");
    }

    #[tokio::test]
    async fn test_listener_rejects_non_loopback() {
        let config = ephemeral().listen("0.0.0.0:0".parse().unwrap());
        let result = NotifyListener::bind(&config).await;

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
