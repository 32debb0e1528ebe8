//! In-memory collaborators for tests.
//!
//! [`MockTransportFactory`] records every open and hands out
//! [`MockTransport`]s whose [`TransportEvents`] sink the test drives directly.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ember_core::{AuthToken, ServiceError, SocketId, TransportError, TransportFault};
use parking_lot::Mutex;
use serde_json::Value;

use crate::collaborators::{AuthTokenStore, EntitlementService, Navigator};
use crate::transport::{CloseReason, ConnectRequest, Transport, TransportEvents, TransportFactory};

// ─────────────────────────────────────────────────────────────────────────────
// Entitlement
// ─────────────────────────────────────────────────────────────────────────────

/// Entitlement service with a settable answer.
pub struct MockEntitlement {
    answer: Mutex<Result<bool, ServiceError>>,
    calls: AtomicUsize,
}

impl MockEntitlement {
    /// Always entitled.
    pub fn granted() -> Self {
        Self::with(Ok(true))
    }

    /// Never entitled.
    pub fn denied() -> Self {
        Self::with(Ok(false))
    }

    /// The check fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self::with(Err(ServiceError::Request(message.to_string())))
    }

    fn with(answer: Result<bool, ServiceError>) -> Self {
        Self {
            answer: Mutex::new(answer),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the answer for later checks.
    pub fn set(&self, active: bool) {
        *self.answer.lock() = Ok(active);
    }

    /// Make later checks fail.
    pub fn fail(&self, message: &str) {
        *self.answer.lock() = Err(ServiceError::Request(message.to_string()));
    }

    /// Number of checks performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementService for MockEntitlement {
    async fn has_active_subscription(&self) -> Result<bool, ServiceError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token store
// ─────────────────────────────────────────────────────────────────────────────

/// Token store with a settable token.
pub struct MockTokenStore {
    token: Mutex<Option<String>>,
}

impl MockTokenStore {
    /// Store holding `token`.
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    /// Logged-out store.
    pub fn empty() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }

    /// Replace (or clear) the token.
    pub fn set(&self, token: Option<&str>) {
        *self.token.lock() = token.map(str::to_string);
    }
}

#[async_trait]
impl AuthTokenStore for MockTokenStore {
    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError> {
        Ok(self.token.lock().clone().map(AuthToken::new))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Navigator
// ─────────────────────────────────────────────────────────────────────────────

/// Navigator that records every route.
#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes navigated to, in order.
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate_to(&self, route: &str) {
        self.routes.lock().push(route.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// How opened mock transports behave.
#[derive(Clone, Debug)]
pub enum MockHandshake {
    /// Report `connected` immediately.
    Accept,
    /// Never report anything; the handshake hangs.
    Silent,
    /// Report `fault` instead of connecting.
    Fault(TransportFault),
    /// `open` itself fails.
    FailOpen(TransportError),
}

/// Factory that records opens and hands out [`MockTransport`]s.
pub struct MockTransportFactory {
    mode: Mutex<MockHandshake>,
    opens: AtomicUsize,
    requests: Mutex<Vec<ConnectRequest>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    /// Factory whose transports connect immediately.
    pub fn new() -> Self {
        Self::with_mode(MockHandshake::Accept)
    }

    /// Factory whose transports never connect.
    pub fn silent() -> Self {
        Self::with_mode(MockHandshake::Silent)
    }

    /// Factory with an explicit behavior.
    pub fn with_mode(mode: MockHandshake) -> Self {
        Self {
            mode: Mutex::new(mode),
            opens: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Change the behavior of later opens.
    pub fn set_mode(&self, mode: MockHandshake) {
        *self.mode.lock() = mode;
    }

    /// Number of `open` calls, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Requests passed to `open`, in order.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }

    /// Successfully opened transports, in order.
    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().clone()
    }

    /// Most recently opened transport.
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.transports.lock().last().cloned()
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(
        &self,
        request: ConnectRequest,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);

        let mode = self.mode.lock().clone();
        match mode {
            MockHandshake::FailOpen(err) => return Err(err),
            MockHandshake::Accept => events.connected(SocketId::new()),
            MockHandshake::Fault(fault) => events.fault(fault),
            MockHandshake::Silent => {}
        }

        let transport = Arc::new(MockTransport::new(events));
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// A transport driven by the test.
pub struct MockTransport {
    events: TransportEvents,
    listening: Mutex<BTreeSet<String>>,
    emitted: Mutex<Vec<(String, Value)>>,
    closes: AtomicUsize,
}

impl MockTransport {
    fn new(events: TransportEvents) -> Self {
        Self {
            events,
            listening: Mutex::new(BTreeSet::new()),
            emitted: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    /// Sink this transport reports to.
    pub fn events(&self) -> &TransportEvents {
        &self.events
    }

    /// Report a successful handshake.
    pub fn accept(&self, socket_id: &str) {
        self.events.connected(SocketId::from_raw(socket_id));
    }

    /// Deliver an inbound event, if it is being listened for.
    pub fn deliver(&self, event: &str, payload: Value) {
        if self.listening.lock().contains(event) {
            self.events.message(event, payload);
        }
    }

    /// Simulate the server closing the socket.
    pub fn drop_connection(&self) {
        self.events.closed(CloseReason::ServerInitiated);
    }

    /// Simulate a server error frame.
    pub fn fault(&self, fault: TransportFault) {
        self.events.fault(fault);
    }

    /// Events currently listened for.
    pub fn listening(&self) -> Vec<String> {
        self.listening.lock().iter().cloned().collect()
    }

    /// Everything emitted through this transport.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().clone()
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }
}

impl Transport for MockTransport {
    fn emit(&self, event: &str, payload: &Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.emitted.lock().push((event.to_string(), payload.clone()));
        Ok(())
    }

    fn listen(&self, event: &str) {
        let _ = self.listening.lock().insert(event.to_string());
    }

    fn unlisten(&self, event: &str) {
        let _ = self.listening.lock().remove(event);
    }

    fn close(&self) {
        if self.closes.fetch_add(1, Ordering::SeqCst) == 0 {
            self.events.closed(CloseReason::ClientInitiated);
        }
    }
}
