//! Per-process wiring
//!
//! One ledger, one hub server, one notifier (sender and listener) and one
//! change poller, connected explicitly:
//!
//! ```text
//!  StockLedger ──outbox──┐
//!                        ├──► dispatch ──► BroadcastHub ──► subscribers
//!  NotifyListener ───────┘        │
//!                                 ├──► Notifier (ledger events only)
//!                                 └──► ChangePoller::refresh
//!  ChangePoller ──────────────────────► BroadcastHub
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::event::{ChangeEvent, EventSink};
use crate::hub::{BroadcastHub, HubConfig, HubHandle, HubServer};
use crate::ledger::{LedgerEvents, StockLedger};
use crate::notify::{Notifier, NotifierConfig, NotifyListener};
use crate::poller::{ChangePoller, Collection, WatchConfig};
use crate::router::TopicRouter;
use crate::subscriber::{ResilientSubscriber, SubscriberConfig};

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Hub server settings
    pub hub: HubConfig,
    /// Cross-process notifier; `None` disables it
    pub notifier: Option<NotifierConfig>,
    /// Collections the poller watches
    pub watches: Vec<(Arc<dyn Collection>, WatchConfig)>,
}

impl EngineConfig {
    /// Default hub, default notifier, no watched collections
    pub fn new() -> Self {
        Self {
            hub: HubConfig::default(),
            notifier: Some(NotifierConfig::default()),
            watches: Vec::new(),
        }
    }

    /// Set the hub configuration
    pub fn hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Set the notifier configuration
    pub fn notifier(mut self, notifier: NotifierConfig) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run without the cross-process notifier
    pub fn without_notifier(mut self) -> Self {
        self.notifier = None;
        self
    }

    /// Watch a collection
    pub fn watch(mut self, collection: Arc<dyn Collection>, config: WatchConfig) -> Self {
        self.watches.push((collection, config));
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Running synchronization engine
pub struct Engine {
    ledger: Arc<StockLedger>,
    hub: HubHandle,
    poller: Arc<ChangePoller>,
    notifier: Option<Arc<Notifier>>,
    notify_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Bind every socket and start every task
    ///
    /// Any bind or validation failure aborts startup and releases whatever
    /// was already bound.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let server = HubServer::bind(config.hub).await?;
        let hub = Arc::clone(server.hub());

        let poller = Arc::new(ChangePoller::new(hub.clone()));
        for (collection, watch) in config.watches {
            poller.watch(collection, watch)?;
        }

        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (notifier, listener) = match config.notifier {
            Some(ref notify_config) => {
                let listener = NotifyListener::bind(notify_config).await?;
                let notifier = Notifier::bind(notify_config).await?;
                (Some(Arc::new(notifier)), Some(listener))
            }
            None => (None, None),
        };
        let notify_addr = listener.as_ref().map(NotifyListener::local_addr);

        let (ledger, outbox) = StockLedger::new();
        let ledger = Arc::new(ledger);

        let hub_handle = server.spawn();
        let mut tasks = Vec::new();

        if let Some(listener) = listener {
            let remote: Arc<dyn EventSink> = Arc::new(move |event: &ChangeEvent| {
                let _ = remote_tx.send(event.clone());
            });
            tasks.push(listener.spawn(remote));
        }

        tasks.push(tokio::spawn(dispatch(
            outbox,
            remote_rx,
            hub,
            notifier.clone(),
            Arc::clone(&poller),
        )));
        poller.spawn();

        tracing::info!(
            hub = %hub_handle.local_addr(),
            notify = ?notify_addr,
            collections = poller.watched().len(),
            "Engine started"
        );

        Ok(Self {
            ledger,
            hub: hub_handle,
            poller,
            notifier,
            notify_addr,
            tasks,
        })
    }

    /// The stock ledger
    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    /// The broadcast hub
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        self.hub.hub()
    }

    /// Address subscribers connect to
    pub fn hub_addr(&self) -> SocketAddr {
        self.hub.local_addr()
    }

    /// The change poller
    pub fn poller(&self) -> &Arc<ChangePoller> {
        &self.poller
    }

    /// The notifier sender, if enabled
    pub fn notifier(&self) -> Option<&Arc<Notifier>> {
        self.notifier.as_ref()
    }

    /// Address the notify listener is bound to, if enabled
    pub fn notify_addr(&self) -> Option<SocketAddr> {
        self.notify_addr
    }

    /// Subscriber configuration pointing at this engine's hub
    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig::new(self.hub_addr())
    }

    /// Create and start a subscriber of this engine's hub
    pub fn subscribe<F>(&self, router: TopicRouter, callback: F) -> Result<ResilientSubscriber>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut subscriber = ResilientSubscriber::new(self.subscriber_config(), router, callback);
        subscriber.start()?;
        Ok(subscriber)
    }

    /// Stop every task and release every socket
    ///
    /// Idempotent.
    pub async fn stop(&mut self) {
        self.poller.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.hub.stop().await;
        tracing::info!(hub = %self.hub.local_addr(), "Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.poller.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Route pushed events to the hub, the notifier and the poller cache
///
/// Ledger events are forwarded to sibling processes; events that came from
/// a sibling are not, so notifications never bounce.
async fn dispatch(
    mut outbox: LedgerEvents,
    mut remote: mpsc::UnboundedReceiver<ChangeEvent>,
    hub: Arc<BroadcastHub>,
    notifier: Option<Arc<Notifier>>,
    poller: Arc<ChangePoller>,
) {
    loop {
        let (event, local) = tokio::select! {
            Some(event) = outbox.recv() => (event, true),
            Some(event) = remote.recv() => (event, false),
            else => break,
        };

        let delivered = hub.broadcast(&event);
        tracing::trace!(topic = event.topic_name(), local = local, delivered = delivered, "Event dispatched");

        if local {
            if let Some(ref notifier) = notifier {
                notifier.notify(event.topic_name());
            }
        }

        let topic = event.topic_name();
        if poller.is_watching(topic) {
            let poller = Arc::clone(&poller);
            let topic = topic.to_string();
            tokio::spawn(async move {
                poller.refresh(&topic).await;
            });
        }
    }
}
