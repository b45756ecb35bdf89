//! The routing state machine.
//!
//! An [`Engine`] owns a node's view of the overlay: its [`Store`], its
//! [`RequestTracker`] and the [`PeerSender`] used to reach neighbors. It
//! starts searches on behalf of local callers and reacts to the three
//! inbound message kinds.
//!
//! ## Routing
//!
//! A key that is not held locally is searched for greedily: the query goes
//! to the untried neighbor whose signpost key has the closest fingerprint.
//! A refusal (not-found, unreachable peer, or missed reply deadline) makes
//! the node try the next closest neighbor. When no neighbor is left the
//! refusal travels one hop back toward whoever asked. A positive answer
//! travels back along the same chain, and every node on the way caches the
//! holder for the key.
//!
//! ## Reply budgets
//!
//! Every query carries the time its receiver has to answer: three quarters
//! of the sender's own wait for that attempt, leaving the rest for the
//! answer's trip back. A relaying node gives each of its attempts at most
//! half of what is left of its budget and refuses upstream once too little
//! is left, so inner hops always give up before the hops that asked them.
//! An answer that still arrives after a node gave up is cached and passed
//! on toward the origin.

use std::collections::{BTreeMap, HashMap};
use std::iter;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use signpost_store::{Location, Store};
use signpost_transport::{Envelope, Found, Message, NotFound, Query};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, NodeEvent};
use crate::outbound::{PeerSender, TcpSender};
use crate::tracker::{RequestState, RequestTracker, Resolution, TrackedRequest};
use crate::{Result, RoutingConfig, MIN_REPLY_WINDOW_MS};

/// Final answer to a search started on this node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// `location` holds the content for `key`.
    Found { key: String, location: Location },
    /// Every reachable neighbor refused.
    NotFound { key: String },
}

impl SearchOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Found { key, .. } | Self::NotFound { key } => key,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

/// Pending result of [`Engine::search`].
#[derive(Debug)]
pub struct SearchHandle {
    key: String,
    request_id: Option<String>,
    rx: oneshot::Receiver<SearchOutcome>,
}

impl SearchHandle {
    /// The network request ID, or `None` if the key was answered locally.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the search to finish.
    ///
    /// If the engine goes away first the search counts as not found.
    pub async fn outcome(self) -> SearchOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => SearchOutcome::NotFound { key: self.key },
        }
    }
}

/// Routing engine for one node.
#[derive(Debug)]
pub struct Engine<S: PeerSender = TcpSender> {
    store: Arc<Store>,
    tracker: RequestTracker,
    sender: S,
    self_addr: String,
    config: RoutingConfig,
    events: EventBus,
    waiters: Mutex<HashMap<String, oneshot::Sender<SearchOutcome>>>,
}

/// Generate a fresh 128-bit request ID, hex encoded.
pub fn new_request_id() -> String {
    let mut id = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut id);
    hex::encode(id)
}

impl<S: PeerSender> Engine<S> {
    /// Build an engine. `self_addr` is the address peers use to reach this
    /// node; it goes out as `sender_id` and is never chosen as a neighbor.
    pub fn new(
        store: Arc<Store>,
        sender: S,
        self_addr: impl Into<String>,
        config: RoutingConfig,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            tracker: RequestTracker::new(),
            sender,
            self_addr: self_addr.into(),
            config,
            events,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Store access
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Location> {
        self.store.get(key)
    }

    /// Write an entry and notify subscribers.
    pub fn put(&self, key: &str, location: Location) -> Result<()> {
        self.store.put(key, location.clone())?;
        self.events.emit(NodeEvent::StoreChanged {
            key: key.to_string(),
            location,
        });
        Ok(())
    }

    /// Delete an entry and notify subscribers if it existed.
    pub fn remove(&self, key: &str) -> Result<Option<Location>> {
        let removed = self.store.remove(key)?;
        if removed.is_some() {
            self.events.emit(NodeEvent::StoreRemoved {
                key: key.to_string(),
            });
        }
        Ok(removed)
    }

    /// Read-only copy of the whole store.
    pub fn store_snapshot(&self) -> BTreeMap<String, Location> {
        self.store.list()
    }

    // -----------------------------------------------------------------------
    // Searches
    // -----------------------------------------------------------------------

    /// Look for `key`, locally first and then through the overlay.
    ///
    /// Returns once the first query is out (or the search is already over);
    /// await [`SearchHandle::outcome`] for the answer.
    pub async fn search(self: &Arc<Self>, key: &str) -> SearchHandle {
        let (tx, rx) = oneshot::channel();

        if let Some(location) = self.store.get(key) {
            info!(%key, %location, "key held in local store");
            let outcome = SearchOutcome::Found {
                key: key.to_string(),
                location,
            };
            self.events.emit(NodeEvent::SearchResolved {
                request_id: None,
                outcome: outcome.clone(),
            });
            let _ = tx.send(outcome);
            return SearchHandle {
                key: key.to_string(),
                request_id: None,
                rx,
            };
        }

        let request_id = new_request_id();
        self.tracker
            .add(&request_id, key, Location::Local, Vec::new());
        self.waiters_lock().insert(request_id.clone(), tx);
        info!(%request_id, %key, "search started");

        self.drive(&request_id).await;

        SearchHandle {
            key: key.to_string(),
            request_id: Some(request_id),
            rx,
        }
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    /// Process one envelope received from a peer.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the payload does not match the declared
    /// type. Routing outcomes are never errors.
    pub async fn handle_envelope(self: &Arc<Self>, envelope: Envelope) -> Result<()> {
        let message = envelope.decode_message()?;
        let sender = envelope.sender_id;
        debug!(kind = %message.kind(), request_id = %message.request_id(), %sender, "envelope received");

        match message {
            Message::Query(query) => self.handle_query(query, &sender).await,
            Message::Found(found) => self.handle_found(found, &sender).await,
            Message::NotFound(not_found) => self.handle_not_found(not_found, &sender).await,
        }
        Ok(())
    }

    async fn handle_query(self: &Arc<Self>, query: Query, sender: &str) {
        let deadline = query.budget().map(|budget| Instant::now() + budget);
        let Query { request_id, key, .. } = query;

        let fresh = self.tracker.try_add(
            &request_id,
            &key,
            Location::Peer(sender.to_string()),
            vec![sender.to_string()],
            deadline,
        );
        if !fresh {
            warn!(%request_id, %sender, "duplicate query refused");
            self.deliver(sender, &Message::not_found(&request_id)).await;
            return;
        }

        if let Some(location) = self.store.get(&key) {
            let holder = match location {
                Location::Local => self.self_addr.clone(),
                Location::Peer(addr) => addr,
            };
            info!(%request_id, %key, %holder, "answering query from local store");
            self.tracker.resolve(
                &request_id,
                Resolution::Found {
                    holder: holder.clone(),
                },
            );
            self.deliver(sender, &Message::found(&request_id, holder)).await;
            return;
        }

        debug!(%request_id, %key, "key not held, forwarding");
        self.drive(&request_id).await;
    }

    async fn handle_found(&self, found: Found, sender: &str) {
        let Found {
            request_id,
            node_id: holder,
        } = found;

        let resolution = Resolution::Found {
            holder: holder.clone(),
        };
        let Some(request) = self.tracker.resolve(&request_id, resolution) else {
            self.handle_late_found(&request_id, &holder, sender).await;
            return;
        };

        self.cache_route(&request.key, &holder);

        match &request.answer_to {
            Location::Local => {
                info!(%request_id, key = %request.key, %holder, "search succeeded");
                self.report(
                    &request_id,
                    SearchOutcome::Found {
                        key: request.key.clone(),
                        location: Location::Peer(holder),
                    },
                );
            }
            Location::Peer(parent) => {
                info!(%request_id, key = %request.key, %holder, %parent, "relaying answer");
                self.deliver(parent, &Message::found(&request_id, holder))
                    .await;
            }
        }
    }

    /// An answer for a request that is already resolved. If this node had
    /// given up, the route is still worth caching and passing on.
    async fn handle_late_found(&self, request_id: &str, holder: &str, sender: &str) {
        let Some(request) = self.tracker.resolve_late(request_id, holder) else {
            if self.tracker.get(request_id).is_some() {
                debug!(%request_id, %sender, "late answer for resolved request dropped");
            } else {
                warn!(%request_id, %sender, "answer for unknown request dropped");
            }
            return;
        };

        info!(%request_id, key = %request.key, %holder, "answer arrived after giving up, caching route");
        self.cache_route(&request.key, holder);
        if let Location::Peer(parent) = &request.answer_to {
            self.deliver(parent, &Message::found(request_id, holder))
                .await;
        }
    }

    async fn handle_not_found(self: &Arc<Self>, not_found: NotFound, sender: &str) {
        let request_id = not_found.request_id;
        if self.tracker.claim_reply(&request_id).is_none() {
            debug!(%request_id, %sender, "refusal not awaited, dropped");
            return;
        }
        info!(%request_id, %sender, "refused, backtracking");
        self.drive(&request_id).await;
    }

    // -----------------------------------------------------------------------
    // Searching loop
    // -----------------------------------------------------------------------

    /// Forward a `Searching` request to the nearest untried neighbor.
    ///
    /// Unreachable neighbors are skipped. Returns once a query has been
    /// delivered or the request is exhausted.
    async fn drive(self: &Arc<Self>, request_id: &str) {
        loop {
            let Some(request) = self.tracker.get(request_id) else {
                debug!(%request_id, "request expired before it could be forwarded");
                return;
            };
            if request.state != RequestState::Searching {
                return;
            }

            let Some(window) = self.reply_window(&request) else {
                debug!(%request_id, key = %request.key, "reply budget spent, giving up");
                self.exhausted(request_id, request).await;
                return;
            };

            let excluding = request
                .visited
                .iter()
                .map(String::as_str)
                .chain(iter::once(self.self_addr.as_str()));
            let next = self.store.nearest_neighbor(&request.key, excluding);
            let Ok(peer) = next else {
                self.exhausted(request_id, request).await;
                return;
            };

            let Some(attempt) = self.tracker.begin_attempt(request_id, &peer) else {
                return;
            };

            let query = Message::query_within(request_id, &request.key, window * 3 / 4);
            match self.send(&peer, &query).await {
                Ok(()) => {
                    info!(%request_id, key = %request.key, %peer, attempt, ?window, "query forwarded");
                    self.arm_deadline(request_id.to_string(), peer, attempt, window);
                    return;
                }
                Err(e) => {
                    error!(%request_id, %peer, error = %e, "forwarding failed, trying next neighbor");
                    if self.tracker.claim_attempt(request_id, attempt).is_none() {
                        return;
                    }
                }
            }
        }
    }

    async fn exhausted(&self, request_id: &str, request: TrackedRequest) {
        if self
            .tracker
            .resolve(request_id, Resolution::Exhausted)
            .is_none()
        {
            return;
        }

        match request.answer_to {
            Location::Local => {
                warn!(%request_id, key = %request.key, "no neighbors left, search failed");
                self.report(request_id, SearchOutcome::NotFound { key: request.key });
            }
            Location::Peer(parent) => {
                if request.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    // Past the asker's deadline: it no longer awaits this refusal.
                    info!(%request_id, key = %request.key, %parent, "asker stopped waiting, dropping request");
                    return;
                }
                info!(%request_id, key = %request.key, %parent, "search exhausted, refusing");
                self.deliver(&parent, &Message::not_found(request_id)).await;
            }
        }
    }

    /// How long the next attempt may wait for its answer.
    ///
    /// Local searches wait the full reply timeout per attempt. A relayed
    /// request gets at most half of what is left before its asker's
    /// deadline, and `None` once that is too short to ask anyone.
    fn reply_window(&self, request: &TrackedRequest) -> Option<Duration> {
        let Some(deadline) = request.deadline else {
            return Some(self.config.reply_timeout);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        let window = (left / 2).min(self.config.reply_timeout);
        (window >= Duration::from_millis(MIN_REPLY_WINDOW_MS)).then_some(window)
    }

    /// Treat silence from `peer` as a refusal once `window` passes, unless
    /// the attempt has already ended.
    fn arm_deadline(
        self: &Arc<Self>,
        request_id: String,
        peer: String,
        attempt: u64,
        window: Duration,
    ) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if engine.tracker.claim_attempt(&request_id, attempt).is_some() {
                warn!(%request_id, %peer, attempt, "no reply before deadline, backtracking");
                engine.drive(&request_id).await;
            }
        });
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn cache_route(&self, key: &str, holder: &str) {
        if holder == self.self_addr {
            return;
        }
        match self.store.cache_route(key, holder) {
            Ok(true) => self.events.emit(NodeEvent::StoreChanged {
                key: key.to_string(),
                location: Location::Peer(holder.to_string()),
            }),
            Ok(false) => {}
            Err(e) => error!(%key, %holder, error = %e, "failed to cache route"),
        }
    }

    fn report(&self, request_id: &str, outcome: SearchOutcome) {
        if let Some(tx) = self.waiters_lock().remove(request_id) {
            let _ = tx.send(outcome.clone());
        }
        self.events.emit(NodeEvent::SearchResolved {
            request_id: Some(request_id.to_string()),
            outcome,
        });
    }

    async fn send(&self, peer: &str, message: &Message) -> Result<()> {
        let envelope = Envelope::new(message, self.self_addr.as_str())?;
        self.sender.send(peer, envelope).await?;
        Ok(())
    }

    /// Send an answer; failures are logged, there is nobody to retry for.
    async fn deliver(&self, peer: &str, message: &Message) {
        if let Err(e) = self.send(peer, message).await {
            error!(request_id = %message.request_id(), kind = %message.kind(), %peer, error = %e, "failed to deliver answer");
        }
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Drop expired requests. Local searches that expire unresolved are
    /// reported as not found. Returns the number of requests dropped.
    pub fn sweep(&self) -> usize {
        let expired = self.tracker.sweep(
            Instant::now(),
            self.config.resolved_ttl,
            self.config.pending_ttl,
        );
        for (request_id, request) in &expired {
            if request.answer_to.is_local() && !request.is_resolved() {
                warn!(%request_id, key = %request.key, "search expired without an answer");
                self.report(
                    request_id,
                    SearchOutcome::NotFound {
                        key: request.key.clone(),
                    },
                );
            }
        }
        expired.len()
    }

    /// Sweep on every `sweep_interval` tick until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dropped = self.sweep();
                    if dropped > 0 {
                        debug!(dropped, remaining = self.tracker.len(), "request sweep");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("sweeper stopped");
    }

    fn waiters_lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<SearchOutcome>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
