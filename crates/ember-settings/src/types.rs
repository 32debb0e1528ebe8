//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every struct implements [`Default`]
//! with production values and is `#[serde(default)]`, so partial JSON works.

use ember_core::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmberSettings {
    /// Settings schema version.
    pub version: String,
    /// Realtime channel settings.
    pub realtime: RealtimeSettings,
    /// REST backend settings.
    pub api: ApiSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for EmberSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            realtime: RealtimeSettings::default(),
            api: ApiSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl EmberSettings {
    /// Reject values that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        let url = self.realtime.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue {
                field: "realtime.url",
                reason: format!("expected ws:// or wss://, got {url:?}"),
            });
        }
        if self.realtime.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue {
                field: "realtime.connectTimeoutMs",
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.realtime.reconnection.jitter_factor) {
            return Err(SettingsError::InvalidValue {
                field: "realtime.reconnection.jitterFactor",
                reason: "must be within 0.0..=1.0".into(),
            });
        }
        let api = self.api.base_url.as_str();
        if !(api.starts_with("http://") || api.starts_with("https://")) {
            return Err(SettingsError::InvalidValue {
                field: "api.baseUrl",
                reason: format!("expected http:// or https://, got {api:?}"),
            });
        }
        Ok(())
    }
}

/// Realtime channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// WebSocket endpoint. Never carries credentials.
    pub url: String,
    /// Manager-owned handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reconnect policy after an unexpected drop.
    pub reconnection: BackoffPolicy,
    /// Route the navigator opens when the subscription is missing.
    pub paywall_route: String,
    /// Route the navigator opens when the user must log in again.
    pub login_route: String,
    /// Outbound frame queue depth per transport.
    pub send_queue: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/realtime".to_string(),
            connect_timeout_ms: 10_000,
            reconnection: BackoffPolicy::default(),
            paywall_route: "Paywall".to_string(),
            login_route: "Login".to_string(),
            send_queue: 256,
        }
    }
}

/// REST backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the REST API.
    pub base_url: String,
    /// Path of the subscription status endpoint.
    pub entitlement_path: String,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            entitlement_path: "/api/subscription/status".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"ember_realtime": "debug"}`.
    pub module_levels: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: std::collections::BTreeMap::new(),
        }
    }
}
