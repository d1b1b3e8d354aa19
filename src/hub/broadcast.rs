//! Broadcast hub implementation
//!
//! Owns the live subscriber set of a process and fans events out to it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::config::HubConfig;
use super::connection;
use super::subscription::{SubscriberId, SubscriberInfo, Subscription};
use crate::error::{Error, Result};
use crate::event::codec::{self, WireMessage};
use crate::event::{ChangeEvent, EventSink};
use crate::router::TopicFilter;
use crate::stats::{HubCounters, HubStats};

/// Set of live subscribers for one process
///
/// The subscriber map lock is only held to register, remove, or snapshot
/// senders; the actual writes happen in one worker per connection, so a
/// slow socket never holds up the others or registration.
pub struct BroadcastHub {
    /// Map of subscriber id to subscription
    subscribers: RwLock<HashMap<SubscriberId, Subscription>>,

    /// Counter for generating subscriber IDs
    next_id: AtomicU64,

    /// Configuration
    config: HubConfig,

    counters: HubCounters,
}

impl BroadcastHub {
    /// Create a new hub with default configuration
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            counters: HubCounters::default(),
        }
    }

    /// Get the hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a subscriber
    ///
    /// Returns its id and the queue of encoded frames destined for it. The
    /// subscriber stays registered until it is removed, pruned, or the
    /// receiver is dropped and a later send notices.
    pub fn attach(
        &self,
        filter: TopicFilter,
        peer: Option<SocketAddr>,
    ) -> Result<(SubscriberId, mpsc::Receiver<Bytes>)> {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);

        let mut subscribers = self.subscribers.write();
        if self.config.max_subscribers > 0 && subscribers.len() >= self.config.max_subscribers {
            tracing::warn!(
                peer = ?peer,
                limit = self.config.max_subscribers,
                "Subscriber rejected: limit reached"
            );
            return Err(Error::Protocol("subscriber limit reached".into()));
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        subscribers.insert(id, Subscription::new(filter, tx, peer));
        self.counters.record_accept();

        tracing::info!(
            subscriber_id = id.0,
            peer = ?peer,
            subscribers = subscribers.len(),
            "Subscriber added"
        );

        Ok((id, rx))
    }

    /// Serve a subscriber connection
    ///
    /// Runs the hello/welcome handshake and then streams frames until either
    /// side closes. Safe to call while broadcasts are in progress.
    pub fn accept<S>(self: &Arc<Self>, stream: S, peer: Option<SocketAddr>) -> tokio::task::JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let hub = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = connection::run(hub, stream, peer).await {
                tracing::debug!(peer = ?peer, error = %e, "Subscriber connection error");
            }
        })
    }

    /// Broadcast an event to every matching subscriber
    ///
    /// The event is encoded once; each subscriber gets a reference-counted
    /// copy of the frame. Returns the number of subscribers it was queued
    /// for. Subscribers whose queue is closed or full are pruned.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(topic = event.topic_name(), error = %e, "Failed to encode event");
                return 0;
            }
        };

        let topic = event.topic_name();
        let scope = event.scope_key();
        let delivered = self.deliver(frame, |sub| sub.filter.matches(topic, scope.as_deref()));
        self.counters.record_broadcast(delivered);

        tracing::trace!(topic = topic, scope = ?scope, delivered = delivered, "Event broadcast");
        delivered
    }

    /// Send a heartbeat frame to every subscriber
    pub fn ping(&self) -> usize {
        match codec::encode(&WireMessage::Ping) {
            Ok(frame) => self.deliver(frame, |_| true),
            Err(_) => 0,
        }
    }

    fn deliver<F>(&self, frame: Bytes, wants: F) -> usize
    where
        F: Fn(&Subscription) -> bool,
    {
        // Snapshot under the read lock, send outside it
        let targets: Vec<(SubscriberId, mpsc::Sender<Bytes>)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, sub)| wants(sub))
                .map(|(id, sub)| (*id, sub.tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = id.0, "Subscriber queue full, dropping");
                    dead.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber_id = id.0, "Subscriber gone, dropping");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            let removed = dead
                .into_iter()
                .filter(|id| subscribers.remove(id).is_some())
                .count();
            self.counters.record_pruned(removed);
        }

        delivered
    }

    /// Remove a subscriber whose connection ended
    ///
    /// Dropping the subscription closes its queue, which ends its
    /// connection worker. Returns false if it was already gone. Not
    /// counted as pruned.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();

        if removed {
            tracing::debug!(subscriber_id = id.0, "Subscriber removed");
        }

        removed
    }

    /// Remove every subscriber whose receiving side is gone
    pub fn prune(&self) -> usize {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|_, sub| !sub.tx.is_closed());
        let removed = before - subscribers.len();

        if removed > 0 {
            self.counters.record_pruned(removed);
            tracing::debug!(removed = removed, "Pruned dead subscribers");
        }

        removed
    }

    /// Drop every subscriber, closing their connections
    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<_> = self.subscribers.write().drain().collect();

        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Disconnected all subscribers");
        }

        drained.len()
    }

    /// Get the number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// List live subscribers
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let mut infos: Vec<SubscriberInfo> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sub)| sub.info(*id))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Get hub statistics
    pub fn stats(&self) -> HubStats {
        self.counters.snapshot(self.subscriber_count())
    }

    /// Spawn background heartbeat task
    ///
    /// Returns `None` when heartbeats are disabled. The returned handle can
    /// be used to abort the task.
    pub fn spawn_heartbeat_task(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let period = self.config.heartbeat_interval;
        if period.is_zero() {
            return None;
        }

        let hub = Arc::clone(self);

        Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let reached = hub.ping();
                tracing::trace!(subscribers = reached, "Heartbeat sent");
            }
        }))
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastHub {
    fn publish(&self, event: &ChangeEvent) {
        self.broadcast(event);
    }
}
