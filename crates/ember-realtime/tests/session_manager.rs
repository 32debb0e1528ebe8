//! Session manager behavior against mock collaborators on a paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use ember_core::{BackoffPolicy, ConnectionState, SessionError, TransportError, TransportFault};
use ember_realtime::mock::{
    MockEntitlement, MockHandshake, MockTokenStore, MockTransportFactory, RecordingNavigator,
};
use ember_realtime::{ConnectOutcome, RealtimeSessionManager, Transport as _};
use serde_json::json;
use tokio::time::Instant;

struct Harness {
    manager: RealtimeSessionManager,
    entitlement: Arc<MockEntitlement>,
    tokens: Arc<MockTokenStore>,
    navigator: Arc<RecordingNavigator>,
    factory: Arc<MockTransportFactory>,
}

fn harness(entitlement: MockEntitlement, factory: MockTransportFactory) -> Harness {
    harness_with(entitlement, factory, BackoffPolicy::default())
}

fn harness_with(
    entitlement: MockEntitlement,
    factory: MockTransportFactory,
    reconnect: BackoffPolicy,
) -> Harness {
    let entitlement = Arc::new(entitlement);
    let tokens = Arc::new(MockTokenStore::with_token("tok-abc"));
    let navigator = Arc::new(RecordingNavigator::new());
    let factory = Arc::new(factory);
    let manager = RealtimeSessionManager::builder(
        entitlement.clone(),
        tokens.clone(),
        navigator.clone(),
        factory.clone(),
    )
    .url("ws://chat.test/realtime")
    .reconnect(reconnect)
    .build();
    Harness {
        manager,
        entitlement,
        tokens,
        navigator,
        factory,
    }
}

/// Let spawned tasks drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&serde_json::Value) + Send + Sync + 'static) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    (hits, move |_: &serde_json::Value| {
        let _ = seen.fetch_add(1, Ordering::SeqCst);
    })
}

// ── Entitlement gate ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn denied_entitlement_never_creates_a_transport() {
    let h = harness(MockEntitlement::denied(), MockTransportFactory::new());

    let outcome = h.manager.connect().await;

    assert_eq!(outcome, ConnectOutcome::Denied);
    assert!(!outcome.is_connected());
    assert_eq!(h.factory.open_count(), 0);
    assert_eq!(h.navigator.routes(), vec!["Paywall".to_string()]);
    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.manager.last_error(), Some(SessionError::EntitlementDenied));
    assert_eq!(h.manager.cached_entitlement(), Some(false));
}

#[tokio::test(start_paused = true)]
async fn entitlement_check_failure_returns_to_idle() {
    let h = harness(MockEntitlement::failing("dns"), MockTransportFactory::new());

    let outcome = h.manager.connect().await;

    assert_eq!(outcome, ConnectOutcome::EntitlementCheckFailed);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_matches!(
        h.manager.last_error(),
        Some(SessionError::EntitlementCheckFailed(msg)) if msg.contains("dns")
    );
    assert_eq!(h.factory.open_count(), 0);
    assert!(h.navigator.routes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_token_routes_to_login() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    h.tokens.set(None);

    let outcome = h.manager.connect().await;

    assert_eq!(outcome, ConnectOutcome::AuthRequired);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.last_error(), Some(SessionError::AuthTokenMissing));
    assert_eq!(h.navigator.routes(), vec!["Login".to_string()]);
    assert_eq!(h.factory.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn blank_token_counts_as_missing() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    h.tokens.set(Some("   "));

    assert_eq!(h.manager.connect().await, ConnectOutcome::AuthRequired);
    assert_eq!(h.factory.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn check_entitlement_caches_the_answer() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert_eq!(h.manager.cached_entitlement(), None);

    assert_eq!(h.manager.check_entitlement().await, Ok(true));
    assert_eq!(h.manager.cached_entitlement(), Some(true));
    assert_eq!(h.manager.state(), ConnectionState::Idle);

    h.entitlement.fail("timeout");
    assert_matches!(
        h.manager.check_entitlement().await,
        Err(SessionError::EntitlementCheckFailed(_))
    );
    assert_eq!(h.manager.cached_entitlement(), Some(true));
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connect_sends_token_in_handshake_not_url() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());

    let outcome = h.manager.connect().await;

    assert_matches!(outcome, ConnectOutcome::Connected { .. });
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert!(h.manager.socket_id().is_some());
    assert_eq!(h.manager.last_error(), None);

    let requests = h.factory.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].handshake.auth.token.expose(), "tok-abc");
    assert_eq!(requests[0].url, "ws://chat.test/realtime");
    assert!(!requests[0].url.contains("tok-abc"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_handshake() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());

    let (a, b) = tokio::join!(h.manager.connect(), h.manager.connect());

    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(h.entitlement.calls(), 1);
    assert_matches!(&a, ConnectOutcome::Connected { .. });
    assert_eq!(a, b);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_timeout() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::silent());

    let (a, b, c) = tokio::join!(h.manager.connect(), h.manager.connect(), h.manager.connect());

    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(a, ConnectOutcome::TimedOut);
    assert_eq!(b, ConnectOutcome::TimedOut);
    assert_eq!(c, ConnectOutcome::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_replaces_the_transport() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());

    assert!(h.manager.connect().await.is_connected());
    assert!(h.manager.connect().await.is_connected());

    let transports = h.factory.transports();
    assert_eq!(transports.len(), 2);
    assert!(transports[0].is_closed());
    assert!(!transports[1].is_closed());
}

#[tokio::test(start_paused = true)]
async fn failed_recheck_closes_the_live_transport() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    let (hits, handler) = counter();
    h.manager.on("message", handler);
    assert!(h.manager.connect().await.is_connected());
    let old = h.factory.last().unwrap();

    h.entitlement.fail("503 from billing");
    assert_eq!(h.manager.connect().await, ConnectOutcome::EntitlementCheckFailed);

    assert!(old.is_closed());
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.socket_id(), None);
    assert!(!h.manager.emit("message", json!({})));

    old.accept("sock-stale");
    old.deliver("message", json!({"text": "stale"}));
    settle().await;

    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.socket_id(), None);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(h.factory.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_recheck_abandons_a_pending_reconnect_handshake() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    h.factory.set_mode(MockHandshake::Silent);
    h.factory.last().unwrap().drop_connection();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.manager.state(), ConnectionState::Connecting);
    assert_eq!(h.factory.open_count(), 2);
    let pending = h.factory.last().unwrap();

    h.entitlement.fail("billing unreachable");
    assert_eq!(h.manager.connect().await, ConnectOutcome::EntitlementCheckFailed);
    assert!(pending.is_closed());
    assert_eq!(h.manager.state(), ConnectionState::Idle);

    pending.accept("sock-late");
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.socket_id(), None);

    // The reconnect loop is gone too.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 2);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn denied_recheck_closes_the_live_transport() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    let old = h.factory.last().unwrap();

    h.entitlement.set(false);
    assert_eq!(h.manager.connect().await, ConnectOutcome::Denied);

    assert!(old.is_closed());
    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.navigator.routes(), vec!["Paywall".to_string()]);

    old.accept("sock-stale");
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.manager.socket_id(), None);
}

#[tokio::test(start_paused = true)]
async fn logged_out_recheck_closes_the_live_transport() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    let old = h.factory.last().unwrap();

    h.tokens.set(None);
    assert_eq!(h.manager.connect().await, ConnectOutcome::AuthRequired);

    assert!(old.is_closed());
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.navigator.routes(), vec!["Login".to_string()]);

    old.accept("sock-stale");
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.manager.socket_id(), None);
}

#[tokio::test(start_paused = true)]
async fn handshake_times_out_after_exactly_the_configured_timeout() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::silent());
    let start = Instant::now();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect().await });

    tokio::time::sleep(Duration::from_millis(9_999)).await;
    assert!(!pending.is_finished());
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    let outcome = pending.await.unwrap();
    assert_eq!(outcome, ConnectOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.manager.state(), ConnectionState::Failed);
    assert_eq!(
        h.manager.last_error(),
        Some(SessionError::HandshakeTimeout(Duration::from_secs(10)))
    );
    assert!(h.factory.last().unwrap().is_closed());
}

#[tokio::test(start_paused = true)]
async fn late_connected_event_after_timeout_is_ignored() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::silent());
    let mut states = h.manager.subscribe_state();

    assert_eq!(h.manager.connect().await, ConnectOutcome::TimedOut);
    let transport = h.factory.last().unwrap();

    transport.accept("sock-late");
    settle().await;

    assert_eq!(h.manager.state(), ConnectionState::Failed);
    assert_eq!(h.manager.socket_id(), None);
    assert_eq!(*states.borrow_and_update(), ConnectionState::Failed);

    // Not retried automatically.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_connect_after_timeout_is_allowed() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::silent());
    assert_eq!(h.manager.connect().await, ConnectOutcome::TimedOut);

    h.factory.set_mode(MockHandshake::Accept);
    assert!(h.manager.connect().await.is_connected());
    assert_eq!(h.factory.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn handshake_rejection_fails_without_retry() {
    let h = harness(
        MockEntitlement::granted(),
        MockTransportFactory::with_mode(MockHandshake::Fault(TransportFault::new(
            "UNAUTHORIZED",
            "bad token",
        ))),
    );

    let outcome = h.manager.connect().await;

    assert_eq!(outcome, ConnectOutcome::Rejected);
    assert_eq!(h.manager.state(), ConnectionState::Failed);
    assert_eq!(
        h.manager.last_error(),
        Some(SessionError::HandshakeRejected("bad token".into()))
    );
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn revocation_during_handshake_is_denied() {
    let h = harness(
        MockEntitlement::granted(),
        MockTransportFactory::with_mode(MockHandshake::Fault(TransportFault::new(
            "PAYMENT_REQUIRED",
            "subscription expired",
        ))),
    );

    assert_eq!(h.manager.connect().await, ConnectOutcome::Denied);
    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.navigator.routes(), vec!["Paywall".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn open_failure_is_reported() {
    let h = harness(
        MockEntitlement::granted(),
        MockTransportFactory::with_mode(MockHandshake::FailOpen(TransportError::InvalidEndpoint(
            "nope".into(),
        ))),
    );

    assert_eq!(h.manager.connect().await, ConnectOutcome::TransportFailed);
    assert_eq!(h.manager.state(), ConnectionState::Failed);
    assert_matches!(h.manager.last_error(), Some(SessionError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_handshake_cancels_connect() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::silent());

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect().await });
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    h.manager.disconnect();

    assert_eq!(pending.await.unwrap(), ConnectOutcome::Cancelled);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert!(h.factory.last().unwrap().is_closed());
}

// ── Listeners ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn listeners_survive_forced_reconnect() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    let (hits, handler) = counter();
    h.manager.on("message", handler);

    assert!(h.manager.connect().await.is_connected());
    let first = h.factory.last().unwrap();
    assert_eq!(first.listening(), vec!["message".to_string()]);

    first.deliver("message", json!({"text": "hi"}));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    first.drop_connection();
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_matches!(h.manager.last_error(), Some(SessionError::Transport(_)));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_eq!(h.factory.open_count(), 2);

    let second = h.factory.last().unwrap();
    assert_eq!(second.listening(), vec!["message".to_string()]);
    second.deliver("message", json!({"text": "again"}));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // The dropped transport no longer reaches handlers.
    first.events().message("message", json!({}));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn on_while_connected_mirrors_onto_transport() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    let transport = h.factory.last().unwrap();

    let (hits, handler) = counter();
    h.manager.on("match", handler);
    assert_eq!(transport.listening(), vec!["match".to_string()]);

    transport.deliver("match", json!({"id": 7}));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn off_stops_delivery_and_unlistens() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    let (hits, handler) = counter();
    h.manager.on("typing", handler);
    assert!(h.manager.connect().await.is_connected());
    let transport = h.factory.last().unwrap();

    h.manager.off("typing");
    h.manager.off("never-registered");

    assert!(transport.listening().is_empty());
    assert_eq!(h.manager.listener_count(), 0);
    transport.events().message("typing", json!({}));
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn on_and_off_are_safe_while_connecting() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::silent());
    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.connect().await });
    settle().await;

    let (_hits, handler) = counter();
    h.manager.on("a", handler);
    h.manager.off("a");
    let (_hits, handler) = counter();
    h.manager.on("b", handler);

    assert_eq!(h.factory.last().unwrap().listening(), vec!["b".to_string()]);
    h.factory.last().unwrap().accept("sock-1");
    assert!(pending.await.unwrap().is_connected());
}

// ── Emit ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn emit_while_disconnected_returns_false_and_does_not_buffer() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());

    assert!(!h.manager.emit("message", json!({"text": "lost"})));
    settle().await;

    // The best-effort background connect went through, without the message.
    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert!(h.factory.last().unwrap().emitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn emit_while_connected_dispatches() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());

    assert!(h.manager.emit("message", json!({"text": "hello"})));

    let emitted = h.factory.last().unwrap().emitted();
    assert_eq!(emitted, vec![("message".to_string(), json!({"text": "hello"}))]);
}

#[tokio::test(start_paused = true)]
async fn emit_send_failure_returns_false() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    h.factory.last().unwrap().close();
    settle().await;

    assert!(!h.manager.emit("message", json!({})));
}

#[tokio::test(start_paused = true)]
async fn emit_does_not_race_a_pending_reconnect() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    h.factory.last().unwrap().drop_connection();
    settle().await;

    assert!(!h.manager.emit("message", json!({})));
    settle().await;
    assert_eq!(h.factory.open_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.factory.open_count(), 2);
    assert!(h.factory.last().unwrap().emitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn emit_while_denied_does_not_recheck() {
    let h = harness(MockEntitlement::denied(), MockTransportFactory::new());
    assert_eq!(h.manager.connect().await, ConnectOutcome::Denied);

    assert!(!h.manager.emit("message", json!({})));
    assert!(!h.manager.emit("message", json!({})));
    settle().await;

    assert_eq!(h.entitlement.calls(), 1);
    assert_eq!(h.navigator.routes(), vec!["Paywall".to_string()]);
    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.factory.open_count(), 0);
}

#[test]
fn emit_without_runtime_does_not_panic() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(!h.manager.emit("message", json!({})));
    assert_eq!(h.factory.open_count(), 0);
}

// ── Revocation and teardown ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn revocation_while_connected_denies_without_reconnect() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    let transport = h.factory.last().unwrap();

    transport.fault(TransportFault::new("PAYMENT_REQUIRED", "subscription expired"));
    settle().await;

    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.manager.last_error(), Some(SessionError::EntitlementRevoked));
    assert_eq!(h.navigator.routes(), vec!["Paywall".to_string()]);
    assert_eq!(h.manager.cached_entitlement(), Some(false));
    assert!(transport.is_closed());

    // The server closing the socket afterwards changes nothing.
    transport.drop_connection();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Denied);
}

#[tokio::test(start_paused = true)]
async fn revocation_detected_from_message_text() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());

    h.factory
        .last()
        .unwrap()
        .fault(TransportFault::message("Payment Required"));
    settle().await;

    assert_eq!(h.manager.state(), ConnectionState::Denied);
}

#[tokio::test(start_paused = true)]
async fn network_fault_is_recorded_only() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());

    h.factory
        .last()
        .unwrap()
        .fault(TransportFault::new("RATE_LIMITED", "slow down"));
    settle().await;

    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_matches!(h.manager.last_error(), Some(SessionError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn disconnect_prevents_any_reconnect() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    let (_hits, handler) = counter();
    h.manager.on("message", handler);
    assert!(h.manager.connect().await.is_connected());
    let transport = h.factory.last().unwrap();

    h.manager.disconnect();

    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert!(transport.is_closed());
    assert_eq!(h.manager.socket_id(), None);
    assert_eq!(h.manager.listener_count(), 1);

    transport.drop_connection();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    h.factory.last().unwrap().drop_connection();
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);

    h.manager.disconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.factory.open_count(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_closes_the_transport() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    let transport = h.factory.last().unwrap();
    settle().await;

    drop(h.manager);

    assert!(transport.is_closed());
}

// ── Reconnect policy ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());

    h.factory
        .set_mode(MockHandshake::FailOpen(TransportError::Closed));
    h.factory.last().unwrap().drop_connection();

    // Delays: 1s, 2s, 4s, 5s, 5s.
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.factory.open_count(), 6);
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(h.manager.last_error(), Some(SessionError::ReconnectExhausted(5)));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn reconnect_stays_disconnected_between_attempts() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    h.factory
        .set_mode(MockHandshake::FailOpen(TransportError::Closed));
    h.factory.last().unwrap().drop_connection();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.factory.open_count(), 2);
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_handshake_timeout_is_not_terminal() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());
    h.factory.set_mode(MockHandshake::Silent);
    h.factory.last().unwrap().drop_connection();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    // First attempt started at 1s and times out at 11s.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(
        h.manager.last_error(),
        Some(SessionError::HandshakeTimeout(Duration::from_secs(10)))
    );

    // Second attempt 2s later succeeds.
    h.factory.set_mode(MockHandshake::Accept);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_eq!(h.factory.open_count(), 3);
    assert_eq!(h.manager.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn reconnect_rechecks_entitlement() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());

    h.entitlement.set(false);
    h.factory.last().unwrap().drop_connection();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.manager.state(), ConnectionState::Denied);
    assert_eq!(h.navigator.routes(), vec!["Paywall".to_string()]);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_stops_when_logged_out() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    assert!(h.manager.connect().await.is_connected());

    h.tokens.set(None);
    h.factory.last().unwrap().drop_connection();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.navigator.routes(), vec!["Login".to_string()]);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_disabled_leaves_session_disconnected() {
    let h = harness_with(
        MockEntitlement::granted(),
        MockTransportFactory::new(),
        BackoffPolicy::disabled(),
    );
    assert!(h.manager.connect().await.is_connected());

    h.factory.last().unwrap().drop_connection();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(h.factory.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_observable() {
    let h = harness(MockEntitlement::granted(), MockTransportFactory::new());
    let mut states = h.manager.subscribe_state();
    assert_eq!(*states.borrow(), ConnectionState::Idle);

    assert!(h.manager.connect().await.is_connected());
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    h.manager.disconnect();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Idle);
}
