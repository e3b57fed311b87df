use crate::data::BookSnapshot;
use crate::exchange::cache::SnapshotCache;
use crate::exchange::feed::{Backoff, ConnectionState, FeedError, FeedProtocol};
use crate::exchange::metrics::IngestorMetrics;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

/// Connection tuning shared by every feed
#[derive(Debug, Clone)]
pub struct IngestorSettings {
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for IngestorSettings {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(10),
        }
    }
}

/// Why a connected session ended without a transport error
enum SessionEnd {
    Shutdown,
    Closed,
    /// Subscription changed on a URL-addressed feed
    Resubscribe,
}

/// Long-lived streaming connection feeding a local snapshot cache.
///
/// Lifecycle:
/// 1. `new` builds the ingestor in `Disconnected` state
/// 2. `subscribe` / `update_subscriptions` record the desired key set
/// 3. `start` spawns the read loop as its own task
/// 4. The loop connects, sends the full key set, and applies book messages
///    to the cache in arrival order
/// 5. On any transport failure it reconnects with exponential backoff and
///    resends the full key set
/// 6. `stop` flips the running flag and waits a bounded time for the task
pub struct StreamIngestor<P: FeedProtocol> {
    protocol: P,
    settings: IngestorSettings,
    cache: Arc<SnapshotCache>,
    metrics: IngestorMetrics,
    state: RwLock<ConnectionState>,
    subscriptions: watch::Sender<BTreeSet<String>>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: FeedProtocol> StreamIngestor<P> {
    pub fn new(protocol: P, settings: IngestorSettings) -> Result<Self, FeedError> {
        let metrics = IngestorMetrics::new(protocol.name())?;
        let (subscriptions, _) = watch::channel(BTreeSet::new());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            protocol,
            settings,
            cache: Arc::new(SnapshotCache::new()),
            metrics,
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions,
            shutdown,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.protocol.name()
    }

    /// Shared cache handle for readers on other tasks
    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    pub fn metrics(&self) -> &IngestorMetrics {
        &self.metrics
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.subscriptions.borrow().clone()
    }

    /// Add one key. Returns true if the desired set changed.
    pub fn subscribe(&self, key: impl AsRef<str>) -> bool {
        let key = self.protocol.normalize_key(key.as_ref());
        self.subscriptions.send_if_modified(|current| current.insert(key))
    }

    /// Replace the desired key set.
    ///
    /// Returns true if the set changed and the full set will be resent; an
    /// identical set triggers no outbound message. Cached books for keys that
    /// were dropped are evicted.
    pub fn update_subscriptions<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired: BTreeSet<String> = keys.into_iter()
            .map(|key| self.protocol.normalize_key(key.as_ref()))
            .collect();
        let changed = self.subscriptions.send_if_modified(|current| {
            if *current == desired {
                return false;
            }
            *current = desired.clone();
            true
        });

        if changed {
            self.cache.retain_keys(&desired);
            debug!(feed = %self.name(), keys = desired.len(), "subscription set updated");
        }
        changed
    }

    /// Latest cached snapshot; never waits on the network
    pub fn get_snapshot(&self, key: &str) -> Option<BookSnapshot> {
        self.cache.get_snapshot(key)
    }

    /// Time since `key` was last updated, `Duration::MAX` if never
    pub fn get_age(&self, key: &str) -> Duration {
        self.cache.get_age(key)
    }

    /// Decode one text frame and apply it to the cache.
    ///
    /// Malformed frames are counted and dropped, never propagated. Updates
    /// for keys outside the current subscription set are ignored, so a late
    /// frame cannot bring back an evicted book.
    pub fn ingest_text(&self, text: &str) {
        self.metrics.messages_received.inc();

        match self.protocol.parse(text, Utc::now()) {
            Ok(updates) => {
                // Held across inserts: eviction in update_subscriptions waits for it
                let subscribed = self.subscriptions.borrow();
                for update in updates {
                    if !subscribed.contains(&update.key) {
                        trace!(feed = %self.name(), key = %update.key, "ignoring unsubscribed key");
                        continue;
                    }
                    trace!(feed = %self.name(), key = %update.key, "book update");
                    self.cache.insert(update.key, update.snapshot);
                }
            }
            Err(e) => {
                self.metrics.messages_dropped.inc();
                debug!(feed = %self.name(), error = %e, "dropping malformed message");
            }
        }
    }

    /// Spawn the read loop. Calling `start` on a running ingestor is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(false);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run().await;
        });
        *self.handle.lock() = Some(handle);
    }

    /// Stop the read loop, waiting at most `timeout` for it to exit.
    ///
    /// A loop that does not exit in time is aborted; the in-flight network
    /// call is abandoned.
    pub async fn stop(&self, timeout: Duration) {
        self.running.store(false, Ordering::Release);
        self.shutdown.send_replace(true);

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!(feed = %self.name(), "read loop did not stop in {:?}, aborting", timeout);
                handle.abort();
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(feed = %self.name(), from = %previous, to = %state, "connection state");
        }
        self.metrics.connected.set(i64::from(state.is_connected()));
    }

    async fn run(&self) {
        let mut backoff = Backoff::new(self.settings.reconnect_base, self.settings.reconnect_max);
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut subs_rx = self.subscriptions.subscribe();

        while self.is_running() && !*shutdown_rx.borrow() {
            // Nothing to stream until at least one key is wanted
            if subs_rx.borrow_and_update().is_empty() {
                self.set_state(ConnectionState::Disconnected);
                tokio::select! {
                    _ = subs_rx.changed() => continue,
                    _ = shutdown_rx.changed() => break,
                }
            }

            self.set_state(ConnectionState::Connecting);
            match self.connect_and_process(&mut backoff, &mut subs_rx, &mut shutdown_rx).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Resubscribe) => {
                    info!(feed = %self.name(), "subscription changed, reconnecting");
                    continue;
                }
                Ok(SessionEnd::Closed) => {
                    info!(feed = %self.name(), "connection closed by server");
                }
                Err(e) => {
                    warn!(feed = %self.name(), error = %e, "connection lost");
                }
            }

            if !self.is_running() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            self.metrics.reconnects.inc();
            let delay = backoff.next_delay();
            info!(feed = %self.name(), "reconnecting in {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(feed = %self.name(), "read loop stopped");
    }

    async fn connect_and_process(
        &self,
        backoff: &mut Backoff,
        subs_rx: &mut watch::Receiver<BTreeSet<String>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, FeedError> {
        let keys = subs_rx.borrow_and_update().clone();
        let url = self.protocol.endpoint(&keys)?;
        let read_timeout = self.settings.read_timeout;

        info!(feed = %self.name(), url = %url, "connecting");
        let (ws_stream, _) = tokio::time::timeout(read_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| FeedError::ConnectTimeout(read_timeout))??;

        backoff.reset();
        self.set_state(ConnectionState::Connected);
        info!(feed = %self.name(), keys = keys.len(), "connected");

        let (mut write, mut read) = ws_stream.split();

        // Full set on every (re)connect
        if let Some(message) = self.protocol.subscribe_message(&keys) {
            write.send(message).await?;
            self.metrics.subscription_messages.inc();
        }

        let mut ping = tokio::time::interval(self.settings.ping_interval);
        ping.tick().await;

        let deadline = tokio::time::sleep(read_timeout);
        tokio::pin!(deadline);
        let mut missed_reads = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }

                changed = subs_rx.changed() => {
                    if changed.is_err() {
                        return Ok(SessionEnd::Shutdown);
                    }
                    let keys = subs_rx.borrow_and_update().clone();
                    match self.protocol.subscribe_message(&keys) {
                        Some(message) => {
                            write.send(message).await?;
                            self.metrics.subscription_messages.inc();
                            info!(feed = %self.name(), keys = keys.len(), "resubscribed");
                        }
                        None => return Ok(SessionEnd::Resubscribe),
                    }
                }

                _ = ping.tick() => {
                    write.send(self.protocol.keepalive()).await?;
                }

                _ = &mut deadline => {
                    missed_reads += 1;
                    if missed_reads >= 2 {
                        return Err(FeedError::ReadTimeout(read_timeout * missed_reads));
                    }
                    self.set_state(ConnectionState::Degraded);
                    warn!(feed = %self.name(), "no data for {:?}, sending keepalive", read_timeout);
                    write.send(self.protocol.keepalive()).await?;
                    deadline.as_mut().reset(Instant::now() + read_timeout);
                }

                frame = read.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Closed),
                    };

                    deadline.as_mut().reset(Instant::now() + read_timeout);
                    if missed_reads > 0 {
                        missed_reads = 0;
                        self.set_state(ConnectionState::Connected);
                    }

                    match message {
                        Message::Text(text) => self.ingest_text(&text),
                        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.ingest_text(text),
                            Err(_) => {
                                self.metrics.messages_dropped.inc();
                                debug!(feed = %self.name(), "dropping non-utf8 binary frame");
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) => {
                            trace!(feed = %self.name(), "ping/pong");
                        }
                        Message::Close(frame) => {
                            info!(feed = %self.name(), ?frame, "received close frame");
                            return Ok(SessionEnd::Closed);
                        }
                        Message::Frame(_) => {}
                    }
                }
            }
        }
    }
}
