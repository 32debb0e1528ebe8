//! Reconnect backoff configuration and delay calculation.
//!
//! Sync-only building blocks. The async reconnect loop lives in
//! `ember-realtime`, which supplies the random jitter sample.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the first reconnect attempt in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default cap on the delay between attempts in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;

/// Bounded reconnect policy: a fixed attempt count with increasing delay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Whether to reconnect at all after an unexpected drop.
    pub enabled: bool,
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt in ms.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0, applied symmetrically.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before zero-based `attempt`, with `random` in `[0.0, 1.0)`.
    pub fn delay(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }

    /// Largest delay this policy can produce, jitter included.
    pub fn max_possible_delay(&self) -> Duration {
        self.delay(self.max_attempts.saturating_sub(1), 1.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (2r - 1) * jitter)`.
/// `random` maps `[0,1)` onto `[-jitter, +jitter]`.
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let policy = BackoffPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 5000);
    }

    #[test]
    fn serde_defaults_fill_missing_fields() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"maxAttempts": 2}"#).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay_ms, 1000);
        assert!(policy.enabled);
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let policy = BackoffPolicy {
            max_delay_ms: 60_000,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(0, 0.5), Duration::from_millis(1000));
        assert_eq!(policy.delay(1, 0.5), Duration::from_millis(2000));
        assert_eq!(policy.delay(2, 0.5), Duration::from_millis(4000));
        assert_eq!(policy.delay(3, 0.5), Duration::from_millis(8000));
    }

    #[test]
    fn capped_at_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(4, 0.5), Duration::from_millis(5000));
        assert_eq!(policy.delay(40, 0.5), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.0), 800);
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 0.5), 1000);
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 60_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn high_attempt_does_not_overflow() {
        let delay = calculate_backoff_delay_with_random(100, u64::MAX / 2, u64::MAX, 0.0, 0.5);
        assert!(delay > 0);
    }

    #[test]
    fn max_possible_delay_includes_jitter() {
        let policy = BackoffPolicy {
            jitter_factor: 0.5,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.max_possible_delay(), Duration::from_millis(7500));
    }

    #[test]
    fn disabled_policy() {
        assert!(!BackoffPolicy::disabled().enabled);
    }
}
