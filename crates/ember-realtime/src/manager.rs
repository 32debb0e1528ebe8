//! Entitlement-gated realtime session manager.
//!
//! [`RealtimeSessionManager`] owns at most one live transport. A connect
//! checks the subscription, fetches the bearer token, opens a transport with
//! the token in the handshake payload and waits for the server to accept it
//! under a manager-owned timeout.
//!
//! Every transport is tagged with a generation number. Tearing a transport
//! down bumps the generation, so late events from it (a "connected" after the
//! timeout fired, a close after `disconnect()`) are discarded.
//!
//! Unexpected drops of an established session are retried by a bounded
//! reconnect loop. Entitlement revocation, missing credentials and handshake
//! rejection are never retried.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use ember_core::{
    AuthToken, BackoffPolicy, ConnectionId, ConnectionState, FaultKind, SessionError, SocketId,
    TransportFault,
};
use ember_settings::RealtimeSettings;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::collaborators::{AuthTokenStore, EntitlementService, Navigator};
use crate::metrics::{
    CONNECT_ATTEMPTS_TOTAL, CONNECT_OUTCOMES_TOTAL, CONNECTED, DISCONNECTIONS_TOTAL,
    EMITS_DROPPED_TOTAL, RECONNECT_ATTEMPTS_TOTAL,
};
use crate::transport::{
    CloseReason, ConnectRequest, HandshakePayload, Transport, TransportEvent, TransportEvents,
    TransportFactory,
};

/// Handler invoked for each inbound event it is registered for.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration for one manager.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// Realtime endpoint.
    pub url: String,
    /// How long to wait for the server to accept the handshake.
    pub connect_timeout: Duration,
    /// Reconnect policy after an unexpected drop.
    pub reconnect: BackoffPolicy,
    /// Route opened when the subscription is missing or revoked.
    pub paywall_route: String,
    /// Route opened when no token is available.
    pub login_route: String,
    /// Outbound queue depth per transport.
    pub send_queue: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from(&RealtimeSettings::default())
    }
}

impl From<&RealtimeSettings> for RealtimeConfig {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            reconnect: settings.reconnection.clone(),
            paywall_route: settings.paywall_route.clone(),
            login_route: settings.login_route.clone(),
            send_queue: settings.send_queue.max(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Result of [`RealtimeSessionManager::connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The server accepted the handshake.
    Connected {
        /// Server-assigned socket id.
        socket_id: SocketId,
    },
    /// No active subscription. The paywall was opened.
    Denied,
    /// No token available. The login route was opened.
    AuthRequired,
    /// The subscription check failed; state is back to `Idle`.
    EntitlementCheckFailed,
    /// The handshake did not complete in time; state is `Failed`.
    TimedOut,
    /// The server refused the credentials; state is `Failed`.
    Rejected,
    /// The transport could not be opened or dropped during the handshake.
    TransportFailed,
    /// A `disconnect()` or newer connect superseded this one.
    Cancelled,
}

impl ConnectOutcome {
    /// Whether the session is now connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Denied => "denied",
            Self::AuthRequired => "auth_required",
            Self::EntitlementCheckFailed => "entitlement_check_failed",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::TransportFailed => "transport_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`RealtimeSessionManager`].
pub struct RealtimeSessionManagerBuilder {
    entitlement: Arc<dyn EntitlementService>,
    tokens: Arc<dyn AuthTokenStore>,
    navigator: Arc<dyn Navigator>,
    transports: Arc<dyn TransportFactory>,
    config: RealtimeConfig,
}

impl RealtimeSessionManagerBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: RealtimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Realtime endpoint.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: BackoffPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Finish building.
    pub fn build(self) -> RealtimeSessionManager {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        RealtimeSessionManager {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                entitlement: self.entitlement,
                tokens: self.tokens,
                navigator: self.navigator,
                transports: self.transports,
                config: self.config,
                session: Mutex::new(Session::default()),
                listeners: Mutex::new(HashMap::new()),
                entitlement_cache: Mutex::new(None),
                inflight: Mutex::new(None),
                state_tx,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the lifecycle of one realtime connection. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeSessionManager {
    inner: Arc<Inner>,
}

type InflightConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

struct Inner {
    id: ConnectionId,
    entitlement: Arc<dyn EntitlementService>,
    tokens: Arc<dyn AuthTokenStore>,
    navigator: Arc<dyn Navigator>,
    transports: Arc<dyn TransportFactory>,
    config: RealtimeConfig,
    session: Mutex<Session>,
    listeners: Mutex<HashMap<String, EventHandler>>,
    entitlement_cache: Mutex<Option<bool>>,
    inflight: Mutex<Option<InflightConnect>>,
    state_tx: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Session {
    state: ConnectionState,
    socket_id: Option<SocketId>,
    last_error: Option<SessionError>,
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    handshake: Option<oneshot::Sender<HandshakeResult>>,
    reconnect: Option<CancellationToken>,
}

#[derive(Debug)]
enum HandshakeResult {
    Connected(SocketId),
    Rejected,
    Revoked,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    Initial,
    Reconnect(u32),
}

impl RealtimeSessionManager {
    /// Start building a manager from its collaborators.
    pub fn builder(
        entitlement: Arc<dyn EntitlementService>,
        tokens: Arc<dyn AuthTokenStore>,
        navigator: Arc<dyn Navigator>,
        transports: Arc<dyn TransportFactory>,
    ) -> RealtimeSessionManagerBuilder {
        RealtimeSessionManagerBuilder {
            entitlement,
            tokens,
            navigator,
            transports,
            config: RealtimeConfig::default(),
        }
    }

    /// Open the realtime session if the user is entitled and logged in.
    ///
    /// Concurrent calls share one in-flight attempt and all receive its
    /// outcome. Never returns an error: every expected failure is a
    /// [`ConnectOutcome`] variant plus the recorded [`last_error`](Self::last_error).
    pub async fn connect(&self) -> ConnectOutcome {
        let attempt = {
            let mut inflight = self.inner.inflight.lock();
            if let Some(existing) = inflight.as_ref() {
                debug!(conn = %self.inner.id, "joining in-flight connect");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    let outcome = Arc::clone(&inner).connect_once().await;
                    *inner.inflight.lock() = None;
                    outcome
                });
                let shared = task
                    .map(|joined| joined.unwrap_or(ConnectOutcome::Cancelled))
                    .boxed()
                    .shared();
                *inflight = Some(shared.clone());
                shared
            }
        };
        attempt.await
    }

    /// Close the session as client-initiated and stop any reconnect loop.
    ///
    /// State becomes `Idle`. Registered listeners are kept.
    pub fn disconnect(&self) {
        let closed = {
            let mut s = self.inner.session.lock();
            Inner::cancel_reconnect(&mut s);
            let closed = Inner::detach(&mut s);
            self.inner.set_state(&mut s, ConnectionState::Idle);
            closed
        };
        if let Some(transport) = closed {
            counter!(DISCONNECTIONS_TOTAL, "reason" => CloseReason::ClientInitiated.as_str())
                .increment(1);
            transport.close();
            info!(conn = %self.inner.id, "disconnected by client");
        }
    }

    /// Send an event if connected.
    ///
    /// Returns `false` without queueing when not connected, and starts a
    /// best-effort connect in the background unless a reconnect is already
    /// pending. A `Denied` session is left alone; only an explicit
    /// [`connect`](Self::connect) re-runs the paywall gate.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let (transport, skip_connect) = {
            let s = self.inner.session.lock();
            let transport = if s.state == ConnectionState::Connected {
                s.transport.clone()
            } else {
                None
            };
            (transport, s.reconnect.is_some() || s.state == ConnectionState::Denied)
        };

        if let Some(transport) = transport {
            return match transport.emit(event, &payload) {
                Ok(()) => true,
                Err(e) => {
                    warn!(conn = %self.inner.id, event, error = %e, "emit failed");
                    counter!(EMITS_DROPPED_TOTAL).increment(1);
                    false
                }
            };
        }

        counter!(EMITS_DROPPED_TOTAL).increment(1);
        debug!(conn = %self.inner.id, event, "not connected, dropping emit");
        if !skip_connect {
            self.connect_in_background();
        }
        false
    }

    /// Register `handler` for `event`, replacing any previous handler.
    ///
    /// The handler survives disconnects and reconnects.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event = event.into();
        let _ = self
            .inner
            .listeners
            .lock()
            .insert(event.clone(), Arc::new(handler));
        if let Some(transport) = self.inner.live_transport() {
            transport.listen(&event);
        }
    }

    /// Remove the handler for `event`.
    pub fn off(&self, event: &str) {
        if self.inner.listeners.lock().remove(event).is_none() {
            return;
        }
        if let Some(transport) = self.inner.live_transport() {
            transport.unlisten(event);
        }
    }

    /// Ask the entitlement service directly, without connecting. Caches the answer.
    pub async fn check_entitlement(&self) -> Result<bool, SessionError> {
        match self.inner.entitlement.has_active_subscription().await {
            Ok(active) => {
                *self.inner.entitlement_cache.lock() = Some(active);
                Ok(active)
            }
            Err(e) => {
                warn!(conn = %self.inner.id, error = %e, "entitlement pre-flight failed");
                Err(SessionError::EntitlementCheckFailed(e.to_string()))
            }
        }
    }

    /// Last known entitlement, if any check has completed.
    pub fn cached_entitlement(&self) -> Option<bool> {
        *self.inner.entitlement_cache.lock()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Whether the session is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Server-assigned socket id while connected.
    pub fn socket_id(&self) -> Option<SocketId> {
        self.inner.session.lock().socket_id.clone()
    }

    /// Most recent error, cleared on a successful handshake.
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.session.lock().last_error.clone()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of registered handlers.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn connect_in_background(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(conn = %self.inner.id, "no runtime, skipping background connect");
            return;
        };
        let manager = self.clone();
        drop(runtime.spawn(async move {
            let _ = manager.connect().await;
        }));
    }
}

impl std::fmt::Debug for RealtimeSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSessionManager")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connect flow
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    async fn connect_once(self: Arc<Self>) -> ConnectOutcome {
        counter!(CONNECT_ATTEMPTS_TOTAL).increment(1);
        // Tear down the previous session before the gate runs.
        let (epoch, previous) = {
            let mut s = self.session.lock();
            Self::cancel_reconnect(&mut s);
            let previous = Self::detach(&mut s);
            self.set_state(&mut s, ConnectionState::CheckingEntitlement);
            (s.generation, previous)
        };
        if let Some(transport) = previous {
            debug!(conn = %self.id, generation = epoch, "closing previous transport");
            transport.close();
        }

        let outcome = self.establish(epoch, Attempt::Initial).await;
        counter!(CONNECT_OUTCOMES_TOTAL, "outcome" => outcome.as_str()).increment(1);
        info!(conn = %self.id, outcome = outcome.as_str(), "connect finished");
        outcome
    }

    /// Entitlement, token, transport. `epoch` is the generation when the
    /// attempt started; any teardown in between cancels the attempt.
    async fn establish(self: &Arc<Self>, epoch: u64, attempt: Attempt) -> ConnectOutcome {
        let entitled = match self.entitlement.has_active_subscription().await {
            Ok(active) => active,
            Err(e) => {
                warn!(conn = %self.id, ?attempt, error = %e, "entitlement check failed");
                let mut s = self.session.lock();
                if s.generation != epoch {
                    return ConnectOutcome::Cancelled;
                }
                s.last_error = Some(SessionError::EntitlementCheckFailed(e.to_string()));
                if attempt == Attempt::Initial {
                    self.set_state(&mut s, ConnectionState::Idle);
                }
                return ConnectOutcome::EntitlementCheckFailed;
            }
        };
        *self.entitlement_cache.lock() = Some(entitled);

        if !entitled {
            info!(conn = %self.id, ?attempt, "no active subscription");
            return if self.deny(epoch, SessionError::EntitlementDenied) {
                ConnectOutcome::Denied
            } else {
                ConnectOutcome::Cancelled
            };
        }

        let token = match self.tokens.get_token().await {
            Ok(token) => token.filter(|t| !t.is_blank()),
            Err(e) => {
                warn!(conn = %self.id, error = %e, "token store failed");
                None
            }
        };
        let Some(token) = token else {
            return self.require_login(epoch);
        };

        self.open_transport(epoch, token, attempt).await
    }

    async fn open_transport(
        self: &Arc<Self>,
        epoch: u64,
        token: AuthToken,
        attempt: Attempt,
    ) -> ConnectOutcome {
        let (generation, handshake_rx, previous) = {
            let mut s = self.session.lock();
            if s.generation != epoch {
                return ConnectOutcome::Cancelled;
            }
            let previous = Self::detach(&mut s);
            let (tx, rx) = oneshot::channel();
            s.handshake = Some(tx);
            self.set_state(&mut s, ConnectionState::Connecting);
            (s.generation, rx, previous)
        };
        if let Some(transport) = previous {
            debug!(conn = %self.id, generation, "closing previous transport");
            transport.close();
        }

        let request = ConnectRequest {
            url: self.config.url.clone(),
            handshake: HandshakePayload::new(token),
            send_queue: self.config.send_queue,
        };
        let (events, event_rx) = TransportEvents::channel(generation);
        let transport = match self.transports.open(request, events) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(conn = %self.id, generation, ?attempt, error = %e, "failed to open transport");
                let mut s = self.session.lock();
                if s.generation != generation {
                    return ConnectOutcome::Cancelled;
                }
                let _ = Self::detach(&mut s);
                s.last_error = Some(SessionError::Transport(e.to_string()));
                self.attempt_failed(&mut s);
                return ConnectOutcome::TransportFailed;
            }
        };

        {
            let mut s = self.session.lock();
            if s.generation != generation {
                drop(s);
                transport.close();
                return ConnectOutcome::Cancelled;
            }
            s.transport = Some(Arc::clone(&transport));
        }
        let names: Vec<String> = self.listeners.lock().keys().cloned().collect();
        for name in &names {
            transport.listen(name);
        }
        drop(tokio::spawn(pump(Arc::downgrade(self), generation, event_rx)));
        debug!(
            conn = %self.id,
            generation,
            ?attempt,
            listeners = names.len(),
            "transport opened, awaiting handshake"
        );

        match tokio::time::timeout(self.config.connect_timeout, handshake_rx).await {
            Ok(Ok(HandshakeResult::Connected(socket_id))) => ConnectOutcome::Connected { socket_id },
            Ok(Ok(HandshakeResult::Rejected)) => ConnectOutcome::Rejected,
            Ok(Ok(HandshakeResult::Revoked)) => ConnectOutcome::Denied,
            Ok(Ok(HandshakeResult::Failed)) => ConnectOutcome::TransportFailed,
            Ok(Err(_)) => ConnectOutcome::Cancelled,
            Err(_) => self.handshake_timed_out(generation),
        }
    }

    fn handshake_timed_out(&self, generation: u64) -> ConnectOutcome {
        let stale = {
            let mut s = self.session.lock();
            if s.generation != generation {
                return ConnectOutcome::Cancelled;
            }
            if s.handshake.is_none() {
                // The server accepted right at the deadline.
                return match (s.state, s.socket_id.clone()) {
                    (ConnectionState::Connected, Some(socket_id)) => {
                        ConnectOutcome::Connected { socket_id }
                    }
                    _ => ConnectOutcome::Cancelled,
                };
            }
            let stale = Self::detach(&mut s);
            s.last_error = Some(SessionError::HandshakeTimeout(self.config.connect_timeout));
            self.attempt_failed(&mut s);
            stale
        };
        warn!(
            conn = %self.id,
            generation,
            timeout_ms = self.config.connect_timeout.as_millis() as u64,
            "handshake timed out"
        );
        if let Some(transport) = stale {
            transport.close();
        }
        ConnectOutcome::TimedOut
    }

    /// Tear down, record `error`, move to `Denied` and open the paywall.
    /// Returns `false` if `epoch` is stale.
    fn deny(&self, epoch: u64, error: SessionError) -> bool {
        let (stale, pending) = {
            let mut s = self.session.lock();
            if s.generation != epoch {
                return false;
            }
            Self::cancel_reconnect(&mut s);
            let pending = s.handshake.take();
            let stale = Self::detach(&mut s);
            s.last_error = Some(error);
            self.set_state(&mut s, ConnectionState::Denied);
            (stale, pending)
        };
        *self.entitlement_cache.lock() = Some(false);
        if let Some(transport) = stale {
            transport.close();
        }
        if let Some(tx) = pending {
            let _ = tx.send(HandshakeResult::Revoked);
        }
        self.navigator.navigate_to(&self.config.paywall_route);
        true
    }

    fn require_login(&self, epoch: u64) -> ConnectOutcome {
        let stale = {
            let mut s = self.session.lock();
            if s.generation != epoch {
                return ConnectOutcome::Cancelled;
            }
            Self::cancel_reconnect(&mut s);
            let stale = Self::detach(&mut s);
            s.last_error = Some(SessionError::AuthTokenMissing);
            self.set_state(&mut s, ConnectionState::Idle);
            stale
        };
        warn!(conn = %self.id, "no auth token, login required");
        if let Some(transport) = stale {
            transport.close();
        }
        self.navigator.navigate_to(&self.config.login_route);
        ConnectOutcome::AuthRequired
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport events
// ─────────────────────────────────────────────────────────────────────────────

async fn pump(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if !inner.handle_event(generation, event) {
            break;
        }
    }
    trace!(generation, "event pump stopped");
}

impl Inner {
    /// Returns `false` once `generation` is stale and the pump should stop.
    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        if self.session.lock().generation != generation {
            debug!(conn = %self.id, generation, kind = event_kind(&event), "discarding event from stale transport");
            return false;
        }
        match event {
            TransportEvent::Connected(socket_id) => self.on_connected(generation, socket_id),
            TransportEvent::Message { event, payload } => self.dispatch(&event, &payload),
            TransportEvent::Closed(reason) => self.on_closed(generation, reason),
            TransportEvent::Fault(fault) => self.on_fault(generation, &fault),
        }
        true
    }

    fn on_connected(&self, generation: u64, socket_id: SocketId) {
        let pending = {
            let mut s = self.session.lock();
            if s.generation != generation || s.state != ConnectionState::Connecting {
                return;
            }
            let Some(pending) = s.handshake.take() else {
                debug!(conn = %self.id, generation, "duplicate connected event ignored");
                return;
            };
            s.socket_id = Some(socket_id.clone());
            s.last_error = None;
            // A reconnect loop that produced this session is done.
            s.reconnect = None;
            self.set_state(&mut s, ConnectionState::Connected);
            pending
        };
        info!(conn = %self.id, generation, socket_id = %socket_id, "realtime session connected");
        let _ = pending.send(HandshakeResult::Connected(socket_id));
    }

    fn dispatch(&self, event: &str, payload: &Value) {
        let handler = self.listeners.lock().get(event).cloned();
        match handler {
            Some(handler) => handler(payload),
            None => trace!(conn = %self.id, event, "no listener for event"),
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        if reason == CloseReason::ClientInitiated {
            return;
        }
        let mut s = self.session.lock();
        if s.generation != generation {
            return;
        }

        if let Some(pending) = s.handshake.take() {
            let _ = Self::detach(&mut s);
            s.last_error = Some(SessionError::Transport(reason.to_string()));
            self.attempt_failed(&mut s);
            drop(s);
            warn!(conn = %self.id, generation, %reason, "transport closed during handshake");
            let _ = pending.send(HandshakeResult::Failed);
            return;
        }

        if s.state != ConnectionState::Connected {
            // An old transport closing while a new connect is being prepared.
            // The generation still belongs to that connect.
            s.transport = None;
            return;
        }

        counter!(DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        let _ = Self::detach(&mut s);
        s.last_error = Some(SessionError::Transport(reason.to_string()));
        self.set_state(&mut s, ConnectionState::Disconnected);

        let policy = self.config.reconnect.clone();
        if !policy.enabled || policy.max_attempts == 0 {
            drop(s);
            warn!(conn = %self.id, generation, %reason, "session dropped, reconnect disabled");
            return;
        }
        let cancel = CancellationToken::new();
        s.reconnect = Some(cancel.clone());
        drop(s);

        warn!(
            conn = %self.id,
            generation,
            %reason,
            max_attempts = policy.max_attempts,
            "session dropped, scheduling reconnect"
        );
        drop(tokio::spawn(reconnect_loop(Arc::downgrade(self), cancel, policy)));
    }

    fn on_fault(&self, generation: u64, fault: &TransportFault) {
        match fault.kind() {
            FaultKind::EntitlementRevoked => {
                warn!(conn = %self.id, generation, %fault, "subscription revoked by server");
                if self.deny(generation, SessionError::EntitlementRevoked) {
                    counter!(DISCONNECTIONS_TOTAL, "reason" => "revoked").increment(1);
                }
            }
            FaultKind::AuthRejected => self.reject(generation, fault),
            FaultKind::Network => {
                warn!(conn = %self.id, generation, %fault, "transport reported an error");
                let mut s = self.session.lock();
                if s.generation == generation {
                    s.last_error = Some(SessionError::Transport(fault.to_string()));
                }
            }
        }
    }

    fn reject(&self, generation: u64, fault: &TransportFault) {
        let (stale, pending) = {
            let mut s = self.session.lock();
            if s.generation != generation {
                return;
            }
            Self::cancel_reconnect(&mut s);
            let pending = s.handshake.take();
            let stale = Self::detach(&mut s);
            s.last_error = Some(SessionError::HandshakeRejected(fault.message.clone()));
            self.set_state(&mut s, ConnectionState::Failed);
            (stale, pending)
        };
        warn!(conn = %self.id, generation, %fault, "credentials rejected by server");
        if let Some(transport) = stale {
            transport.close();
        }
        if let Some(tx) = pending {
            let _ = tx.send(HandshakeResult::Rejected);
        }
    }
}

fn event_kind(event: &TransportEvent) -> &'static str {
    match event {
        TransportEvent::Connected(_) => "connected",
        TransportEvent::Message { .. } => "message",
        TransportEvent::Closed(_) => "closed",
        TransportEvent::Fault(_) => "fault",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnect loop
// ─────────────────────────────────────────────────────────────────────────────

async fn reconnect_loop(inner: Weak<Inner>, cancel: CancellationToken, policy: BackoffPolicy) {
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay(attempt, rand::random::<f64>());
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let Some(manager) = inner.upgrade() else { return };
        let outcome = tokio::select! {
            () = cancel.cancelled() => return,
            outcome = manager.reconnect_attempt(attempt, &cancel) => outcome,
        };

        match outcome {
            ConnectOutcome::EntitlementCheckFailed
            | ConnectOutcome::TimedOut
            | ConnectOutcome::TransportFailed => manager.between_attempts(&cancel),
            ConnectOutcome::Connected { .. }
            | ConnectOutcome::Denied
            | ConnectOutcome::AuthRequired
            | ConnectOutcome::Rejected
            | ConnectOutcome::Cancelled => return,
        }
    }

    if let Some(manager) = inner.upgrade() {
        manager.reconnect_exhausted(&cancel, policy.max_attempts);
    }
}

impl Inner {
    async fn reconnect_attempt(
        self: &Arc<Self>,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> ConnectOutcome {
        let epoch = {
            let mut s = self.session.lock();
            if cancel.is_cancelled() {
                return ConnectOutcome::Cancelled;
            }
            self.set_state(&mut s, ConnectionState::Connecting);
            s.generation
        };
        counter!(RECONNECT_ATTEMPTS_TOTAL).increment(1);
        info!(conn = %self.id, attempt = attempt + 1, "reconnecting");
        self.establish(epoch, Attempt::Reconnect(attempt)).await
    }

    fn between_attempts(&self, cancel: &CancellationToken) {
        let mut s = self.session.lock();
        if !cancel.is_cancelled() {
            self.set_state(&mut s, ConnectionState::Disconnected);
        }
    }

    fn reconnect_exhausted(&self, cancel: &CancellationToken, attempts: u32) {
        let mut s = self.session.lock();
        if cancel.is_cancelled() {
            return;
        }
        s.reconnect = None;
        s.last_error = Some(SessionError::ReconnectExhausted(attempts));
        self.set_state(&mut s, ConnectionState::Disconnected);
        // Already Disconnected between attempts; wake observers for the final error.
        self.state_tx.send_modify(|_| {});
        drop(s);
        warn!(conn = %self.id, attempts, "reconnect attempts exhausted");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn set_state(&self, s: &mut Session, next: ConnectionState) {
        let previous = s.state;
        if previous == next {
            return;
        }
        s.state = next;
        if next == ConnectionState::Connected {
            gauge!(CONNECTED).set(1.0);
        } else if previous == ConnectionState::Connected {
            gauge!(CONNECTED).set(0.0);
        }
        debug!(conn = %self.id, from = %previous, to = %next, generation = s.generation, "state transition");
        let _ = self.state_tx.send_replace(next);
    }

    /// A failed handshake is `Failed` unless a reconnect loop owns it; the
    /// loop moves to `Disconnected` between attempts.
    fn attempt_failed(&self, s: &mut Session) {
        if s.reconnect.is_none() {
            self.set_state(s, ConnectionState::Failed);
        }
    }

    /// Invalidate the current generation and hand back the live transport.
    /// The caller closes it after releasing the lock.
    fn detach(s: &mut Session) -> Option<Arc<dyn Transport>> {
        s.generation += 1;
        s.handshake = None;
        s.socket_id = None;
        s.transport.take()
    }

    fn cancel_reconnect(s: &mut Session) {
        if let Some(cancel) = s.reconnect.take() {
            cancel.cancel();
        }
    }

    fn live_transport(&self) -> Option<Arc<dyn Transport>> {
        self.session.lock().transport.clone()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let s = self.session.get_mut();
        if let Some(cancel) = s.reconnect.take() {
            cancel.cancel();
        }
        if let Some(transport) = s.transport.take() {
            transport.close();
        }
    }
}
