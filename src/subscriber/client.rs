//! Resilient subscriber implementation
//!
//! A tokio task owns the connection and the reconnect loop; a dedicated OS
//! thread runs the application callback so a slow callback never stalls
//! the socket and callbacks see events in receipt order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::config::SubscriberConfig;
use super::state::{ReconnectState, SubscriberState};
use crate::error::{Error, Result};
use crate::event::codec::{self, FrameReader, WireMessage};
use crate::event::ChangeEvent;
use crate::router::TopicRouter;

/// Application callback, invoked once per accepted event
pub type Callback = Box<dyn FnMut(ChangeEvent) + Send + 'static>;

struct Shared {
    stopped: AtomicBool,
    /// Held while a callback runs so `stop` can wait for it
    gate: Mutex<()>,
    dispatcher: Mutex<Option<ThreadId>>,
    reconnect: Mutex<ReconnectState>,
}

/// Hub client that reconnects on its own
///
/// # Example
/// ```no_run
/// use stock_sync::router::{TopicFilter, TopicRouter};
/// use stock_sync::subscriber::{ResilientSubscriber, SubscriberConfig};
///
/// # async fn example() -> stock_sync::Result<()> {
/// let config = SubscriberConfig::new("127.0.0.1:47900".parse().unwrap());
/// let router = TopicRouter::from_filter(TopicFilter::scoped("stock", "42"));
///
/// let mut subscriber = ResilientSubscriber::new(config, router, |event| {
///     println!("changed: {:?}", event);
/// });
/// subscriber.start()?;
/// // ...
/// subscriber.stop();
/// # Ok(())
/// # }
/// ```
pub struct ResilientSubscriber {
    config: SubscriberConfig,
    router: Arc<TopicRouter>,
    callback: Option<Callback>,
    shared: Arc<Shared>,
    state: Arc<watch::Sender<SubscriberState>>,
    task: Option<JoinHandle<()>>,
}

impl ResilientSubscriber {
    /// Create a subscriber; nothing happens until [`start`](Self::start)
    pub fn new<F>(config: SubscriberConfig, router: TopicRouter, callback: F) -> Self
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        let reconnect = ReconnectState::new(config.hub_addr, config.reconnect_delay);

        Self {
            config,
            router: Arc::new(router),
            callback: Some(Box::new(callback)),
            shared: Arc::new(Shared {
                stopped: AtomicBool::new(false),
                gate: Mutex::new(()),
                dispatcher: Mutex::new(None),
                reconnect: Mutex::new(reconnect),
            }),
            state: Arc::new(state),
            task: None,
        }
    }

    /// Start connecting
    ///
    /// Must be called from within a tokio runtime. Calling it again, or
    /// after [`stop`](Self::stop), does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            tracing::debug!(hub = %self.config.hub_addr, "Subscriber already stopped");
            return Ok(());
        }
        let Some(callback) = self.callback.take() else {
            return Ok(());
        };
        self.config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::clone(&self.shared);
        let dispatcher = thread::Builder::new()
            .name("stock-sync-dispatch".into())
            .spawn(move || dispatch(events_rx, callback, shared))?;
        *self.shared.dispatcher.lock() = Some(dispatcher.thread().id());

        let task = tokio::spawn(run(
            self.config.clone(),
            Arc::clone(&self.router),
            events_tx,
            Arc::clone(&self.state),
            Arc::clone(&self.shared),
        ));
        self.task = Some(task);

        tracing::info!(hub = %self.config.hub_addr, "Subscriber started");
        Ok(())
    }

    /// Stop for good
    ///
    /// Cancels any pending reconnect, closes the connection and waits for an
    /// in-flight callback to return. No callback starts after this returns.
    /// Idempotent; safe to call from inside the callback.
    pub fn stop(&mut self) {
        // Flipped under the state channel's lock so the connection task can
        // never publish a state after this one
        let shared = &self.shared;
        let first = self.state.send_if_modified(|current| {
            if shared.stopped.swap(true, Ordering::SeqCst) {
                return false;
            }
            *current = SubscriberState::Disconnected;
            true
        });
        if !first {
            return;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }

        let on_dispatcher = *self.shared.dispatcher.lock() == Some(thread::current().id());
        if !on_dispatcher {
            drop(self.shared.gate.lock());
        }

        tracing::info!(hub = %self.config.hub_addr, "Subscriber stopped");
    }

    /// Current connection state
    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    /// Wait until the subscriber reaches `target`
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: SubscriberState, timeout: Duration) -> bool {
        let mut changes = self.state_changes();
        let reached = async {
            loop {
                if *changes.borrow_and_update() == target {
                    return true;
                }
                if changes.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    /// Reconnect bookkeeping
    pub fn reconnect_state(&self) -> ReconnectState {
        self.shared.reconnect.lock().clone()
    }

    /// Check if [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Get the configuration
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }
}

impl Drop for ResilientSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(mut events: mpsc::UnboundedReceiver<ChangeEvent>, mut callback: Callback, shared: Arc<Shared>) {
    while let Some(event) = events.blocking_recv() {
        let _gate = shared.gate.lock();
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        // A panicking callback loses its event, not the subscriber
        if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::error!("Subscriber callback panicked; event dropped");
        }
    }
}

/// Publish a state change unless the subscriber has been stopped
fn set_state(state: &watch::Sender<SubscriberState>, shared: &Shared, next: SubscriberState) -> bool {
    state.send_if_modified(|current| {
        if shared.stopped.load(Ordering::SeqCst) || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

async fn run(
    config: SubscriberConfig,
    router: Arc<TopicRouter>,
    events: mpsc::UnboundedSender<ChangeEvent>,
    state: Arc<watch::Sender<SubscriberState>>,
    shared: Arc<Shared>,
) {
    let hub = config.hub_addr;

    loop {
        shared.reconnect.lock().attempt();
        set_state(&state, &shared, SubscriberState::Connecting);

        let result = session(&config, &router, &events, &state, &shared).await;
        set_state(&state, &shared, SubscriberState::Disconnected);

        match result {
            Ok(()) => tracing::info!(hub = %hub, "Hub connection closed"),
            Err(e) => {
                shared.reconnect.lock().failed();
                tracing::warn!(hub = %hub, error = %e, "Hub connection failed");
            }
        }

        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        tracing::debug!(
            hub = %hub,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn session(
    config: &SubscriberConfig,
    router: &TopicRouter,
    events: &mpsc::UnboundedSender<ChangeEvent>,
    state: &watch::Sender<SubscriberState>,
    shared: &Shared,
) -> Result<()> {
    let timeout = config.connect_timeout;
    let (mut frames, _writer, subscriber_id) = tokio::time::timeout(timeout, connect(config))
        .await
        .map_err(|_| Error::ConnectTimeout(timeout))??;

    shared.reconnect.lock().connected();
    set_state(state, shared, SubscriberState::Connected);
    tracing::info!(hub = %config.hub_addr, subscriber_id = subscriber_id, "Subscribed");

    loop {
        let next = match config.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, frames.next_frame())
                .await
                .map_err(|_| Error::Protocol(format!("no traffic for {:?}", idle)))?,
            None => frames.next_frame().await,
        };

        let Some(frame) = next? else {
            return Ok(());
        };

        match router.route(&frame) {
            Ok(Some(event)) => {
                tracing::trace!(topic = event.topic_name(), "Event received");
                if events.send(event).is_err() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Ignoring malformed frame"),
        }
    }
}

/// Connect, send hello and wait for welcome
///
/// The write half is returned so the connection stays open in both
/// directions; dropping it would signal EOF to the hub.
async fn connect(config: &SubscriberConfig) -> Result<(FrameReader<OwnedReadHalf>, OwnedWriteHalf, u64)> {
    let stream = TcpStream::connect(config.hub_addr).await?;
    if config.tcp_nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(hub = %config.hub_addr, error = %e, "Failed to configure socket");
        }
    }

    let (reader, mut writer) = stream.into_split();
    let hello = codec::encode(&WireMessage::Hello {
        topic: config.filter.topic.clone(),
        scope_key: config.filter.scope_key.clone(),
    })?;
    writer.write_all(&hello).await?;

    let mut frames = FrameReader::new(reader, config.max_frame_len);
    let frame = frames
        .next_frame()
        .await?
        .ok_or_else(|| Error::Protocol("hub closed before welcome".into()))?;

    match codec::decode(&frame)? {
        WireMessage::Welcome { subscriber_id } => Ok((frames, writer, subscriber_id)),
        other => Err(Error::Protocol(format!("expected welcome, got {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Instant;

    use super::*;
    use crate::event::ItemId;
    use crate::hub::{HubConfig, HubHandle, HubServer};
    use crate::router::TopicFilter;

    async fn spawn_hub(config: HubConfig) -> HubHandle {
        HubServer::bind(config).await.unwrap().spawn()
    }

    fn loopback() -> HubConfig {
        HubConfig::default().bind("127.0.0.1:0".parse().unwrap())
    }

    fn fast(addr: SocketAddr) -> SubscriberConfig {
        SubscriberConfig::new(addr)
            .reconnect_delay(Duration::from_millis(100))
            .connect_timeout(Duration::from_millis(500))
    }

    fn collector() -> (
        impl FnMut(ChangeEvent) + Send + 'static,
        std::sync::mpsc::Receiver<(ChangeEvent, ThreadId)>,
    ) {
        let (tx, rx) = std::sync::mpsc::channel();
        let callback = move |event: ChangeEvent| {
            let _ = tx.send((event, thread::current().id()));
        };
        (callback, rx)
    }

    async fn eventually<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_idle_until_started() {
        let hub = spawn_hub(loopback()).await;
        let (callback, _rx) = collector();
        let subscriber = ResilientSubscriber::new(fast(hub.local_addr()), TopicRouter::accept_all(), callback);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
        assert_eq!(hub.hub().subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_filtered_delivery_on_dispatch_thread() {
        let hub = spawn_hub(loopback()).await;
        let (callback, rx) = collector();
        let router = TopicRouter::from_filter(TopicFilter::scoped("stock", "42"));

        let mut subscriber = ResilientSubscriber::new(fast(hub.local_addr()), router, callback);
        tokio_test::assert_ok!(subscriber.start());
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);

        hub.hub().broadcast(&ChangeEvent::stock(ItemId(43), 9, 1));
        hub.hub().broadcast(&ChangeEvent::topic("menu"));
        hub.hub().broadcast(&ChangeEvent::stock(ItemId(42), 2, 1));
        hub.hub().broadcast(&ChangeEvent::stock(ItemId(42), 1, 2));

        let (first, thread_id) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let (second, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, ChangeEvent::stock(ItemId(42), 2, 1));
        assert_eq!(second, ChangeEvent::stock(ItemId(42), 1, 2));
        assert_ne!(thread_id, thread::current().id());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        subscriber.stop();
    }

    #[tokio::test]
    async fn test_hello_filter_prefilters_at_hub() {
        let hub = spawn_hub(loopback()).await;
        let (callback, rx) = collector();
        let config = fast(hub.local_addr()).filter(TopicFilter::topic("menu"));

        let mut subscriber = ResilientSubscriber::new(config, TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);

        assert_eq!(hub.hub().broadcast(&ChangeEvent::topic("orders")), 0);
        assert_eq!(hub.hub().broadcast(&ChangeEvent::topic("menu")), 1);

        let (event, _) = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ChangeEvent::topic("menu"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reconnects_after_forced_close() {
        let hub = spawn_hub(loopback()).await;
        let (callback, rx) = collector();

        let mut subscriber = ResilientSubscriber::new(fast(hub.local_addr()), TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);

        let started = Instant::now();
        assert_eq!(hub.hub().disconnect_all(), 1);

        // Back within reconnect delay plus connect time
        let hub_ref = hub.hub().clone();
        assert!(
            eventually(
                || hub_ref.stats().total_accepted == 2 && hub_ref.subscriber_count() == 1,
                Duration::from_secs(2)
            )
            .await
        );
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(1)).await);
        assert_eq!(subscriber.reconnect_state().connections, 2);

        hub.hub().broadcast(&ChangeEvent::topic("orders"));
        let (event, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ChangeEvent::topic("orders"));

        subscriber.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retries_until_hub_appears() {
        // Reserve a port, then free it so the first attempts are refused
        let placeholder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let (callback, _rx) = collector();
        let mut subscriber = ResilientSubscriber::new(
            fast(addr).reconnect_delay(Duration::from_millis(50)),
            TopicRouter::accept_all(),
            callback,
        );
        subscriber.start().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!subscriber.state().is_connected());
        assert!(subscriber.reconnect_state().failures >= 2);

        let hub = spawn_hub(HubConfig::with_addr(addr)).await;
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);
        assert_eq!(hub.hub().subscriber_count(), 1);
        assert_eq!(subscriber.reconnect_state().failures, 0);

        subscriber.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_timeout_counts_as_failure() {
        // Accepts connections but never answers the hello
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                held.push(stream);
            }
        });

        let (callback, _rx) = collector();
        let config = fast(addr)
            .connect_timeout(Duration::from_millis(100))
            .reconnect_delay(Duration::from_millis(50));
        let mut subscriber = ResilientSubscriber::new(config, TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!subscriber.state().is_connected());
        assert!(subscriber.reconnect_state().failures >= 2);

        // A real hub takes over the address
        holder.abort();
        let _ = holder.await;
        let hub = spawn_hub(HubConfig::with_addr(addr)).await;

        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);
        assert_eq!(hub.hub().subscriber_count(), 1);
        assert_eq!(subscriber.reconnect_state().failures, 0);

        subscriber.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_callback_keeps_subscriber_alive() {
        let hub = spawn_hub(loopback()).await;
        let (tx, rx) = std::sync::mpsc::channel();
        let callback = move |event: ChangeEvent| {
            if event.topic_name() == "broken" {
                panic!("callback failure");
            }
            let _ = tx.send(event);
        };

        let mut subscriber = ResilientSubscriber::new(fast(hub.local_addr()), TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);

        hub.hub().broadcast(&ChangeEvent::topic("broken"));
        hub.hub().broadcast(&ChangeEvent::topic("orders"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), ChangeEvent::topic("orders"));

        // Still reconnects after the panic
        hub.hub().disconnect_all();
        let hub_ref = hub.hub().clone();
        assert!(
            eventually(
                || hub_ref.stats().total_accepted == 2 && hub_ref.subscriber_count() == 1,
                Duration::from_secs(2)
            )
            .await
        );
        assert!(!subscriber.is_stopped());

        hub.hub().broadcast(&ChangeEvent::topic("menu"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), ChangeEvent::topic("menu"));

        subscriber.stop();
    }

    #[test]
    fn test_state_frozen_after_stop() {
        let (callback, _rx) = collector();
        let mut subscriber = ResilientSubscriber::new(
            fast("127.0.0.1:1".parse().unwrap()),
            TopicRouter::accept_all(),
            callback,
        );

        assert!(set_state(&subscriber.state, &subscriber.shared, SubscriberState::Connecting));
        subscriber.stop();
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);

        // A connection task still running after stop cannot publish
        assert!(!set_state(&subscriber.state, &subscriber.shared, SubscriberState::Connected));
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_timeout_forces_reconnect() {
        let hub = spawn_hub(loopback().disable_heartbeat()).await;
        let (callback, _rx) = collector();
        let config = fast(hub.local_addr()).idle_timeout(Duration::from_millis(100));

        let mut subscriber = ResilientSubscriber::new(config, TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();

        let hub_ref = hub.hub().clone();
        assert!(eventually(|| hub_ref.stats().total_accepted >= 2, Duration::from_secs(2)).await);

        subscriber.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_halts_callbacks_and_reconnects() {
        let hub = spawn_hub(loopback()).await;
        let (callback, rx) = collector();

        let mut subscriber = ResilientSubscriber::new(fast(hub.local_addr()), TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);

        subscriber.stop();
        subscriber.stop();
        assert!(subscriber.is_stopped());
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);

        hub.hub().broadcast(&ChangeEvent::topic("orders"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        // The aborted task drops the socket; no reconnect follows
        let hub_ref = hub.hub().clone();
        assert!(eventually(|| hub_ref.subscriber_count() == 0, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hub.hub().stats().total_accepted, 1);

        // Restart after stop is a no-op
        subscriber.start().unwrap();
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_from_inside_callback() {
        let hub = spawn_hub(loopback()).await;
        let slot: Arc<Mutex<Option<ResilientSubscriber>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = std::sync::mpsc::channel();

        let inner = Arc::clone(&slot);
        let callback = move |event: ChangeEvent| {
            let _ = tx.send(event);
            if let Some(subscriber) = inner.lock().as_mut() {
                subscriber.stop();
            }
        };

        let mut subscriber = ResilientSubscriber::new(fast(hub.local_addr()), TopicRouter::accept_all(), callback);
        subscriber.start().unwrap();
        assert!(subscriber.wait_for_state(SubscriberState::Connected, Duration::from_secs(2)).await);
        *slot.lock() = Some(subscriber);

        hub.hub().broadcast(&ChangeEvent::topic("a"));
        hub.hub().broadcast(&ChangeEvent::topic("b"));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), ChangeEvent::topic("a"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(slot.lock().as_ref().unwrap().is_stopped());
    }
}
