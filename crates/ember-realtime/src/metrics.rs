//! Metric names recorded by the session manager.

/// Connect attempts started by callers (counter).
pub const CONNECT_ATTEMPTS_TOTAL: &str = "realtime_connect_attempts_total";
/// Connect results (counter, labels: outcome).
pub const CONNECT_OUTCOMES_TOTAL: &str = "realtime_connect_outcomes_total";
/// Automatic reconnect attempts (counter).
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "realtime_reconnect_attempts_total";
/// Sessions that ended (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "realtime_disconnections_total";
/// Emits that were not delivered (counter).
pub const EMITS_DROPPED_TOTAL: &str = "realtime_emits_dropped_total";
/// 1 while a session is connected (gauge).
pub const CONNECTED: &str = "realtime_connected";
