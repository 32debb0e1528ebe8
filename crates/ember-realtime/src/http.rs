//! Subscription status over the REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ember_core::ServiceError;
use ember_settings::ApiSettings;
use serde::Deserialize;
use tracing::debug;

use crate::collaborators::{AuthTokenStore, EntitlementService};

const MAX_ERROR_BODY: usize = 512;

/// `GET {base_url}{entitlement_path}` with the user's bearer token.
pub struct HttpEntitlementService {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn AuthTokenStore>,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(alias = "hasActiveSubscription")]
    active: bool,
}

impl HttpEntitlementService {
    /// Service with its own client.
    pub fn new(settings: &ApiSettings, tokens: Arc<dyn AuthTokenStore>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        Ok(Self::with_client(settings, tokens, client))
    }

    /// Service sharing an existing client.
    pub fn with_client(
        settings: &ApiSettings,
        tokens: Arc<dyn AuthTokenStore>,
        client: reqwest::Client,
    ) -> Self {
        let url = format!(
            "{}{}",
            settings.base_url.trim_end_matches('/'),
            settings.entitlement_path
        );
        Self { client, url, tokens }
    }

    /// Endpoint this service calls.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EntitlementService for HttpEntitlementService {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn has_active_subscription(&self) -> Result<bool, ServiceError> {
        let token = self
            .tokens
            .get_token()
            .await?
            .filter(|t| !t.is_blank())
            .ok_or(ServiceError::Unauthenticated)?;

        let resp = self
            .client
            .get(&self.url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY),
            });
        }

        let parsed: StatusBody =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;
        debug!(active = parsed.active, "subscription status");
        Ok(parsed.active)
    }
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
