//! # ember-core
//!
//! Shared vocabulary for the Ember realtime layer.
//!
//! - **Connection state**: [`ConnectionState`], the single state a session is in
//! - **Errors**: [`SessionError`] taxonomy plus collaborator/transport errors via `thiserror`
//! - **Faults**: [`TransportFault`] classification (entitlement revoked vs. auth vs. network)
//! - **Branded IDs**: `ConnectionId`, `SocketId` as newtypes
//! - **Tokens**: [`AuthToken`], a redacted bearer token
//! - **Backoff**: [`retry::BackoffPolicy`] for bounded reconnect delays

#![deny(unsafe_code)]

pub mod errors;
pub mod fault;
pub mod ids;
pub mod retry;
pub mod security;
pub mod state;

pub use errors::{ServiceError, SessionError, TransportError};
pub use fault::{FaultKind, TransportFault};
pub use ids::{ConnectionId, SocketId};
pub use retry::BackoffPolicy;
pub use security::AuthToken;
pub use state::ConnectionState;
