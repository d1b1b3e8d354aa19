//! Hub server listener
//!
//! Handles the TCP accept loop and hands each connection to the hub.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::broadcast::BroadcastHub;
use super::config::HubConfig;
use crate::error::Result;

/// TCP front end of a [`BroadcastHub`]
pub struct HubServer {
    hub: Arc<BroadcastHub>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HubServer {
    /// Validate the configuration and bind the listen socket
    ///
    /// Bind failures surface here so the caller never runs a hub that is
    /// not listening.
    pub async fn bind(config: HubConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Hub listening");

        Ok(Self {
            hub: Arc::new(BroadcastHub::with_config(config)),
            listener,
            local_addr,
        })
    }

    /// Get a reference to the hub
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the server
    ///
    /// This method runs until the task is dropped or aborted.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// On shutdown every subscriber is disconnected.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let heartbeat = self.hub.spawn_heartbeat_task();

        tokio::select! {
            _ = shutdown => {
                tracing::info!(addr = %self.local_addr, "Hub shutdown signal received");
            }
            _ = self.accept_loop() => {}
        }

        if let Some(handle) = heartbeat {
            handle.abort();
        }
        self.hub.disconnect_all();

        Ok(())
    }

    /// Spawn the accept loop onto the runtime
    pub fn spawn(self) -> HubHandle {
        let hub = Arc::clone(&self.hub);
        let local_addr = self.local_addr;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = self.run_until(shutdown).await {
                tracing::error!(error = %e, "Hub server stopped with error");
            }
        });

        HubHandle {
            hub,
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    async fn accept_loop(&self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!(peer = %peer_addr, "New connection");

        if self.hub.config().tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(peer = %peer_addr, error = %e, "Failed to configure socket");
            }
        }

        self.hub.accept(socket, Some(peer_addr));
    }
}

/// Handle to a spawned hub server
pub struct HubHandle {
    hub: Arc<BroadcastHub>,
    local_addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HubHandle {
    /// Get a reference to the hub
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drop all subscribers and wait for the loop to exit
    ///
    /// Idempotent.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.hub.disconnect_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::error::Error;
    use crate::event::codec::{self, FrameReader, WireMessage};
    use crate::event::{ChangeEvent, ItemId};

    fn loopback() -> HubConfig {
        HubConfig::default().bind("127.0.0.1:0".parse().unwrap())
    }

    type Client = (
        FrameReader<tokio::net::tcp::OwnedReadHalf>,
        tokio::net::tcp::OwnedWriteHalf,
    );

    async fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"type\":\"hello\"}\n").await.unwrap();

        let mut frames = FrameReader::new(reader, 4096);
        let welcome = codec::decode(&frames.next_frame().await.unwrap().unwrap()).unwrap();
        assert!(matches!(welcome, WireMessage::Welcome { .. }));
        (frames, writer)
    }

    #[tokio::test]
    async fn test_bind_resolves_port() {
        let server = HubServer::bind(loopback()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_startup_error() {
        let first = HubServer::bind(loopback()).await.unwrap();
        let result = HubServer::bind(HubConfig::with_addr(first.local_addr())).await;

        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_is_startup_error() {
        let result = HubServer::bind(loopback().subscriber_buffer(0)).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_broadcast_over_tcp() {
        let mut handle = HubServer::bind(loopback()).await.unwrap().spawn();

        let (mut a, _wa) = connect(handle.local_addr()).await;
        let (mut b, _wb) = connect(handle.local_addr()).await;
        assert_eq!(handle.hub().subscriber_count(), 2);

        let event = ChangeEvent::stock(ItemId(42), 1, 3);
        assert_eq!(handle.hub().broadcast(&event), 2);

        for frames in [&mut a, &mut b] {
            let frame = frames.next_frame().await.unwrap().unwrap();
            assert_eq!(codec::decode(&frame).unwrap().into_event().unwrap(), event);
        }

        handle.stop().await;
        assert_eq!(handle.hub().subscriber_count(), 0);
        assert!(a.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_pings_subscribers() {
        let config = loopback().heartbeat_interval(Duration::from_millis(50));
        let mut handle = HubServer::bind(config).await.unwrap().spawn();

        let (mut frames, _writer) = connect(handle.local_addr()).await;
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.next_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(codec::decode(&frame).unwrap(), WireMessage::Ping);

        handle.stop().await;
    }
}
