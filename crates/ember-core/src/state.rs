//! Realtime session state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a realtime session. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection attempted, or the client disconnected.
    #[default]
    Idle,
    /// Waiting for the subscription check.
    CheckingEntitlement,
    /// No active subscription. The user was sent to the paywall.
    Denied,
    /// Handshake in flight.
    Connecting,
    /// Transport open and authenticated.
    Connected,
    /// Transport dropped without the client asking; reconnect may follow.
    Disconnected,
    /// The current attempt timed out or was rejected. Not retried automatically.
    Failed,
}

impl ConnectionState {
    /// Whether a connect attempt or live session currently owns the transport slot.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::CheckingEntitlement | Self::Connecting | Self::Connected
        )
    }

    /// Short name for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingEntitlement => "checking_entitlement",
            Self::Denied => "denied",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
