//! Reconnect policy and backoff calculation.
//!
//! Portable, sync-only building blocks for the reconnect loop. The timers
//! themselves live in `scout-realtime`, which owns the Tokio tasks.
//!
//! - [`ReconnectPolicy`]: initial delay, ceiling, and optional jitter
//! - [`apply_jitter`]: perturb a delay with caller-supplied randomness

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default delay before the first reconnect attempt, in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default ceiling for the reconnect delay, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor. Zero keeps reconnect timing deterministic.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;

/// Exponential backoff parameters for reconnecting the event stream.
///
/// There is no retry limit: the client keeps trying for as long as it is
/// active, and the ceiling bounds how long any single wait can be.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Delay before the first retry after a failure (default: 1000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 applied to the scheduled sleep (default: 0.0).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to store after a failure that was scheduled at `current_ms`.
    ///
    /// Doubles and caps at [`Self::max_delay_ms`].
    #[must_use]
    pub fn next_delay(&self, current_ms: u64) -> u64 {
        current_ms.saturating_mul(2).min(self.max_delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Apply symmetric jitter to a delay.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG. It is mapped to
/// `[-jitter, +jitter]`, so a factor of 0.2 varies the delay by ±20%.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn apply_jitter(delay_ms: u64, jitter_factor: f64, random: f64) -> u64 {
    if jitter_factor <= 0.0 {
        return delay_ms;
    }
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (delay_ms as f64) * jitter;
    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // -- ReconnectPolicy --

    #[test]
    fn policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!(policy.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn policy_serde_defaults() {
        let policy: ReconnectPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, ReconnectPolicy::default());
    }

    #[test]
    fn policy_serde_camel_case() {
        let policy: ReconnectPolicy =
            serde_json::from_str(r#"{"initialDelayMs": 250, "maxDelayMs": 4000}"#).unwrap();
        assert_eq!(policy.initial_delay_ms, 250);
        assert_eq!(policy.max_delay_ms, 4000);
    }

    #[test]
    fn next_delay_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(1000), 2000);
        assert_eq!(policy.next_delay(16_000), 30_000);
        assert_eq!(policy.next_delay(30_000), 30_000);
    }

    #[test]
    fn next_delay_saturates() {
        let policy = ReconnectPolicy {
            max_delay_ms: u64::MAX,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.next_delay(u64::MAX), u64::MAX);
    }

    #[test]
    fn next_delay_sequence_from_defaults() {
        let policy = ReconnectPolicy::default();
        let mut delay = policy.initial_delay_ms;
        let mut seen = vec![delay];
        for _ in 0..6 {
            delay = policy.next_delay(delay);
            seen.push(delay);
        }
        assert_eq!(seen, vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);
    }

    // -- apply_jitter --

    #[test]
    fn jitter_zero_factor_is_identity() {
        assert_eq!(apply_jitter(1000, 0.0, 0.9), 1000);
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(apply_jitter(1000, 0.2, 0.0), 800);
        assert_eq!(apply_jitter(1000, 0.2, 0.5), 1000);
        assert_eq!(apply_jitter(1000, 0.2, 1.0), 1200);
    }

    proptest! {
        #[test]
        fn repeated_next_delay_matches_closed_form(failures in 0u32..40) {
            let policy = ReconnectPolicy::default();
            let mut delay = policy.initial_delay_ms;
            for _ in 0..failures {
                delay = policy.next_delay(delay);
            }
            let expected = policy
                .initial_delay_ms
                .saturating_mul(1u64 << failures.min(31))
                .min(policy.max_delay_ms);
            prop_assert_eq!(delay, expected);
        }

        #[test]
        fn delay_never_exceeds_ceiling(failures in 0u32..1000, initial in 1u64..100_000) {
            let policy = ReconnectPolicy {
                initial_delay_ms: initial,
                max_delay_ms: 30_000u64.max(initial),
                ..ReconnectPolicy::default()
            };
            let mut delay = initial;
            for _ in 0..failures {
                delay = policy.next_delay(delay);
                prop_assert!(delay <= policy.max_delay_ms);
            }
        }
    }
}
