//! # ember-realtime
//!
//! Entitlement-gated realtime sessions.
//!
//! - [`RealtimeSessionManager`]: subscription-gated connect, authenticated
//!   handshake, bounded reconnect, event routing, teardown
//! - [`transport`]: the contract a socket implementation fulfils
//! - [`ws`]: WebSocket transport over `tokio-tungstenite`
//! - [`http`]: subscription status over the REST API
//! - [`tokens`], [`navigator`]: headless collaborator implementations
//! - [`mock`]: in-memory collaborators for tests

#![deny(unsafe_code)]

pub mod collaborators;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod mock;
pub mod navigator;
pub mod tokens;
pub mod transport;
pub mod ws;

pub use collaborators::{AuthTokenStore, EntitlementService, Navigator};
pub use http::HttpEntitlementService;
pub use manager::{
    ConnectOutcome, EventHandler, RealtimeConfig, RealtimeSessionManager,
    RealtimeSessionManagerBuilder,
};
pub use navigator::{ChannelNavigator, LoggingNavigator};
pub use tokens::{EnvTokenStore, FileTokenStore, StaticTokenStore};
pub use transport::{
    CloseReason, ConnectRequest, HandshakePayload, Transport, TransportEvent, TransportEvents,
    TransportFactory,
};
pub use ws::{WsTransport, WsTransportFactory};
