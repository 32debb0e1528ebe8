//! Transport fault classification.
//!
//! The server reports errors on an open socket as a code plus a message.
//! Structured codes are checked first; message text is only a fallback for
//! servers that send bare strings.

use serde::{Deserialize, Serialize};

/// An error reported by the server (or the transport) on a live socket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFault {
    /// Machine-readable code, when the server sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// What a fault means for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Subscription lapsed or payment failed: fatal, never retried.
    EntitlementRevoked,
    /// Credentials were refused.
    AuthRejected,
    /// Anything else; treated as a transient network problem.
    Network,
}

const REVOKED_CODES: &[&str] = &["PAYMENT_REQUIRED", "402", "SUBSCRIPTION_REQUIRED"];
const AUTH_CODES: &[&str] = &["UNAUTHORIZED", "401", "AUTH_FAILED"];
const REVOKED_PHRASES: &[&str] = &["payment required", "subscription required"];
const AUTH_PHRASES: &[&str] = &["unauthorized", "invalid token"];

impl TransportFault {
    /// Fault with a code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Fault carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Classify this fault.
    pub fn kind(&self) -> FaultKind {
        if let Some(code) = self.code.as_deref() {
            let code = code.trim();
            if REVOKED_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return FaultKind::EntitlementRevoked;
            }
            if AUTH_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return FaultKind::AuthRejected;
            }
        }

        let lower = self.message.to_lowercase();
        if REVOKED_PHRASES.iter().any(|p| lower.contains(p)) {
            FaultKind::EntitlementRevoked
        } else if AUTH_PHRASES.iter().any(|p| lower.contains(p)) {
            FaultKind::AuthRejected
        } else {
            FaultKind::Network
        }
    }
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}
