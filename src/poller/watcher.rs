//! Change poller implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::collection::{Collection, Fingerprint};
use super::config::WatchConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeEvent, EventSink};
use crate::stats::{PollerCounters, PollerStats};

#[derive(Clone)]
struct Watch {
    collection: Arc<dyn Collection>,
    config: WatchConfig,
    /// Set while a fingerprint read occupies a blocking thread
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the blocking read finishes, even by panic
struct ReadSlot(Arc<AtomicBool>);

impl Drop for ReadSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Cached {
    /// Order in which the read that produced `fingerprint` started
    ticket: u64,
    fingerprint: Fingerprint,
}

/// Detects changes made behind the ledger's back
///
/// Every watched collection gets its own task and at most one blocking
/// read at a time, so a slow or hung read only delays that collection.
pub struct ChangePoller {
    sink: Arc<dyn EventSink>,
    watches: RwLock<HashMap<String, Watch>>,
    /// Last observed fingerprint per collection
    cache: Mutex<HashMap<String, Cached>>,
    next_ticket: AtomicU64,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    counters: PollerCounters,
}

impl ChangePoller {
    /// Create a poller that publishes detected changes to `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            watches: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
            counters: PollerCounters::new(),
        }
    }

    /// Register a collection
    ///
    /// Takes effect for the polling loop on the next [`spawn`](Self::spawn).
    pub fn watch(&self, collection: Arc<dyn Collection>, config: WatchConfig) -> Result<()> {
        config.validate()?;

        let name = collection.name().to_string();
        if name.is_empty() {
            return Err(Error::Config("collection name must not be empty".into()));
        }

        let mut watches = self.watches.write();
        if watches.contains_key(&name) {
            return Err(Error::Config(format!("collection {} is already watched", name)));
        }

        tracing::info!(
            collection = %name,
            interval_ms = config.interval.as_millis() as u64,
            "Watching collection"
        );
        watches.insert(
            name,
            Watch {
                collection,
                config,
                busy: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    /// Names of watched collections
    pub fn watched(&self) -> Vec<String> {
        let mut names: Vec<_> = self.watches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a collection is watched
    pub fn is_watching(&self, name: &str) -> bool {
        self.watches.read().contains_key(name)
    }

    /// Last cached fingerprint for a collection
    pub fn cached(&self, name: &str) -> Option<Fingerprint> {
        self.cache.lock().get(name).map(|cached| cached.fingerprint.clone())
    }

    /// Run one check of a collection
    ///
    /// The first successful read only seeds the cache. A failed or timed-out
    /// read skips the tick, as does a tick that finds the previous read still
    /// running. Returns the event that was published, if any.
    pub async fn poll_once(&self, name: &str) -> Option<ChangeEvent> {
        let watch = self.watches.read().get(name).cloned()?;
        let (ticket, current) = self.read(&watch).await?;

        let Some(previous) = self.store(name, ticket, current.clone()) else {
            // A newer read already updated the cache
            self.counters.record_tick(false);
            return None;
        };
        let changed = matches!(previous, Some(ref prev) if *prev != current);
        self.counters.record_tick(changed);

        if !changed {
            return None;
        }

        tracing::debug!(collection = %name, count = current.count, marker = %current.marker, "Collection changed");

        let event = ChangeEvent::topic(name);
        self.sink.publish(&event);
        Some(event)
    }

    /// Recompute and cache a fingerprint without publishing
    ///
    /// Called after a push notification for `topic` so the next tick does
    /// not report the same change again. Returns `false` if the topic is not
    /// a watched collection, the read failed, another read was still running
    /// or a newer fingerprint is already cached.
    pub async fn refresh(&self, topic: &str) -> bool {
        let Some(watch) = self.watches.read().get(topic).cloned() else {
            return false;
        };

        let Some((ticket, current)) = self.read(&watch).await else {
            return false;
        };

        let stored = self.store(topic, ticket, current).is_some();
        if stored {
            tracing::trace!(collection = %topic, "Fingerprint refreshed");
        }
        stored
    }

    /// Cache a fingerprint unless a read that started later got there first
    ///
    /// Returns the replaced fingerprint, or `None` if this one was stale.
    fn store(&self, name: &str, ticket: u64, fingerprint: Fingerprint) -> Option<Option<Fingerprint>> {
        let mut cache = self.cache.lock();

        if let Some(cached) = cache.get(name) {
            if cached.ticket > ticket {
                tracing::trace!(collection = %name, "Discarding stale fingerprint");
                return None;
            }
        }

        let previous = cache.insert(name.to_string(), Cached { ticket, fingerprint });
        Some(previous.map(|cached| cached.fingerprint))
    }

    async fn read(&self, watch: &Watch) -> Option<(u64, Fingerprint)> {
        let name = watch.collection.name();

        // A timed-out read keeps its blocking thread; never start a second one
        if watch.busy.swap(true, Ordering::AcqRel) {
            self.counters.record_skip();
            tracing::debug!(collection = %name, "Previous read still running, skipping");
            return None;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        let collection = Arc::clone(&watch.collection);
        let slot = ReadSlot(Arc::clone(&watch.busy));
        let task = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            collection.fingerprint()
        });

        let failure = match tokio::time::timeout(watch.config.read_timeout, task).await {
            Ok(Ok(Ok(fingerprint))) => return Some((ticket, fingerprint)),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(e)) => format!("fingerprint task failed: {}", e),
            Err(_) => format!("read timed out after {:?}", watch.config.read_timeout),
        };

        self.counters.record_skip();
        tracing::warn!(collection = %name, reason = %failure, "Skipping poll tick");
        None
    }

    /// Spawn a polling task for every watched collection not yet running
    pub fn spawn(self: &Arc<Self>) {
        let watches: Vec<(String, WatchConfig)> = self
            .watches
            .read()
            .iter()
            .map(|(name, watch)| (name.clone(), watch.config))
            .collect();

        let mut tasks = self.tasks.lock();
        for (name, config) in watches {
            if tasks.contains_key(&name) {
                continue;
            }

            let poller = Arc::clone(self);
            let topic = name.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    poller.poll_once(&topic).await;
                }
            });
            tasks.insert(name, handle);
        }
    }

    /// Cancel every polling task
    pub fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        for (name, handle) in tasks {
            handle.abort();
            tracing::debug!(collection = %name, "Polling stopped");
        }
    }

    /// Check if any polling task is running
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Get poller statistics
    pub fn stats(&self) -> PollerStats {
        self.counters.snapshot()
    }
}

impl Drop for ChangePoller {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}
