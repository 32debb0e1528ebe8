//! Boundaries to the rest of the app: subscription status, credentials, navigation.

use async_trait::async_trait;
use ember_core::{AuthToken, ServiceError};

/// Answers whether the current user may open a realtime session.
#[async_trait]
pub trait EntitlementService: Send + Sync {
    /// Whether the user holds an active subscription. No side effects.
    async fn has_active_subscription(&self) -> Result<bool, ServiceError>;
}

/// Supplies the bearer token for the handshake.
#[async_trait]
pub trait AuthTokenStore: Send + Sync {
    /// The stored token, or `None` when the user is logged out.
    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError>;
}

/// Fire-and-forget UI navigation.
pub trait Navigator: Send + Sync {
    /// Open `route`. Must not block.
    fn navigate_to(&self, route: &str);
}
