//! Error types for the realtime layer.
//!
//! - [`SessionError`]: the caller-visible taxonomy recorded as a session's last error
//! - [`ServiceError`]: failures from external collaborators (entitlement API, token store)
//! - [`TransportError`]: failures opening or writing to a transport

use std::time::Duration;

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// SessionError
// ─────────────────────────────────────────────────────────────────────────────

/// Why a realtime session is not (or no longer) connected.
///
/// Classified as fatal (needs user action), retryable (handled by the
/// reconnect loop), or neither (caller may retry manually).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The subscription check itself failed.
    #[error("could not verify subscription: {0}")]
    EntitlementCheckFailed(String),
    /// The user has no active subscription.
    #[error("an active subscription is required")]
    EntitlementDenied,
    /// No bearer token is available; the user must log in again.
    #[error("authentication required")]
    AuthTokenMissing,
    /// The transport did not report "connected" in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// The server refused the handshake credentials.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    /// Generic network failure on an established session.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server revoked the subscription mid-session.
    #[error("subscription revoked by server")]
    EntitlementRevoked,
    /// The reconnect loop gave up.
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

impl SessionError {
    /// Errors the reconnect loop retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Errors that need the user to re-subscribe or log in again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EntitlementDenied | Self::EntitlementRevoked | Self::AuthTokenMissing
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EntitlementCheckFailed(_) => "entitlement_check_failed",
            Self::EntitlementDenied => "entitlement_denied",
            Self::AuthTokenMissing => "auth_token_missing",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::HandshakeRejected(_) => "handshake_rejected",
            Self::Transport(_) => "transport",
            Self::EntitlementRevoked => "entitlement_revoked",
            Self::ReconnectExhausted(_) => "reconnect_exhausted",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServiceError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by an external collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The backend answered with a non-success status.
    #[error("http {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },
    /// The request never completed (DNS, TCP, TLS, timeout).
    #[error("request failed: {0}")]
    Request(String),
    /// The response body did not match the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
    /// The call needs a bearer token and none was available.
    #[error("no credentials available")]
    Unauthenticated,
    /// Local storage could not be read.
    #[error("storage error: {0}")]
    Storage(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// TransportError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure opening or writing to a transport.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint URL is unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The transport is closed or its writer task has exited.
    #[error("transport closed")]
    Closed,
    /// The outbound queue is full; the message was dropped.
    #[error("send queue full")]
    QueueFull,
    /// The payload could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
