//! WebSocket transport over `tokio-tungstenite`.
//!
//! Wire format (JSON text frames):
//! - client → server, first frame: `{"type":"handshake","auth":{"token":"…"}}`
//! - server → client: `{"type":"connection.established","data":{"socketId":"…"}}`
//! - server → client: `{"type":"event","event":"<name>","data":…}`
//! - server → client: `{"type":"error","data":{"code":"…","message":"…"}}`
//! - client → server: `{"type":"event","event":"<name>","data":…}`

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ember_core::{SocketId, TransportError, TransportFault};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::transport::{
    CloseReason, ConnectRequest, HandshakePayload, Transport, TransportEvents, TransportFactory,
};

/// Opens [`WsTransport`]s. Must be called from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransportFactory;

impl TransportFactory for WsTransportFactory {
    fn open(
        &self,
        request: ConnectRequest,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if !(request.url.starts_with("ws://") || request.url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint(request.url));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::InvalidEndpoint(format!("no runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(request.send_queue.max(1));
        let listening = Arc::new(RwLock::new(HashSet::new()));
        let cancel = CancellationToken::new();

        debug!(url = %request.url, generation = events.generation(), "opening websocket");
        drop(runtime.spawn(run_socket(
            request,
            events,
            outbound_rx,
            Arc::clone(&listening),
            cancel.clone(),
        )));

        Ok(Arc::new(WsTransport {
            outbound: outbound_tx,
            listening,
            cancel,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One WebSocket connection. Writes go through a bounded queue to the socket task.
pub struct WsTransport {
    outbound: mpsc::Sender<Message>,
    listening: Arc<RwLock<HashSet<String>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Transport for WsTransport {
    fn emit(&self, event: &str, payload: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let frame = json!({ "type": "event", "event": event, "data": payload });
        let text =
            serde_json::to_string(&frame).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.outbound
            .try_send(Message::text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn listen(&self, event: &str) {
        let _ = self.listening.write().insert(event.to_string());
    }

    fn unlisten(&self, event: &str) {
        let _ = self.listening.write().remove(event);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket(
    request: ConnectRequest,
    events: TransportEvents,
    mut outbound: mpsc::Receiver<Message>,
    listening: Arc<RwLock<HashSet<String>>>,
    cancel: CancellationToken,
) {
    let generation = events.generation();
    let ws = tokio::select! {
        () = cancel.cancelled() => {
            events.closed(CloseReason::ClientInitiated);
            return;
        }
        connected = connect_async(request.url.as_str()) => match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(generation, error = %e, "websocket connect failed");
                events.closed(CloseReason::Network(e.to_string()));
                return;
            }
        },
    };
    let (mut sink, mut stream) = ws.split();

    let handshake = match handshake_frame(&request.handshake) {
        Ok(text) => text,
        Err(e) => {
            warn!(generation, error = %e, "handshake encode failed");
            events.closed(CloseReason::Network(e.to_string()));
            return;
        }
    };
    if let Err(e) = sink.send(Message::text(handshake)).await {
        events.closed(CloseReason::Network(e.to_string()));
        return;
    }
    trace!(generation, "handshake frame sent");

    loop {
        // Queued writes go out before a close is honored.
        tokio::select! {
            biased;
            Some(msg) = outbound.recv() => {
                if let Err(e) = sink.send(msg).await {
                    events.closed(CloseReason::Network(e.to_string()));
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                events.closed(CloseReason::ClientInitiated);
                break;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), &events, &listening),
                Some(Ok(Message::Close(_))) | None => {
                    events.closed(CloseReason::ServerInitiated);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.closed(CloseReason::Network(e.to_string()));
                    break;
                }
            },
        }
    }
    debug!(generation, "websocket task finished");
}

#[derive(Serialize)]
struct HandshakeFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    payload: &'a HandshakePayload,
}

fn handshake_frame(handshake: &HandshakePayload) -> Result<String, TransportError> {
    let frame = HandshakeFrame {
        kind: "handshake",
        payload: handshake,
    };
    serde_json::to_string(&frame).map_err(|e| TransportError::Encode(e.to_string()))
}

/// Route one inbound text frame to the sink.
fn handle_frame(text: &str, events: &TransportEvents, listening: &RwLock<HashSet<String>>) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        debug!(len = text.len(), "ignoring non-JSON frame");
        return;
    };
    let data = frame.get("data").cloned().unwrap_or(Value::Null);

    match frame.get("type").and_then(Value::as_str) {
        Some("connection.established") => {
            let socket_id = ["socketId", "clientId"]
                .iter()
                .find_map(|key| data.get(*key).and_then(Value::as_str))
                .map_or_else(SocketId::new, SocketId::from_raw);
            events.connected(socket_id);
        }
        Some("event") => {
            let Some(name) = frame.get("event").and_then(Value::as_str) else {
                return;
            };
            if listening.read().contains(name) {
                events.message(name, data);
            } else {
                trace!(event = name, "dropping unlistened event");
            }
        }
        Some("error") => events.fault(parse_fault(&data)),
        other => trace!(frame_type = ?other, "ignoring frame"),
    }
}

fn parse_fault(data: &Value) -> TransportFault {
    let code = match data.get("code") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let message = match data {
        Value::String(s) => s.clone(),
        _ => data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };
    TransportFault { code, message }
}
