//! Transient-error retry policy: exponential backoff, base 200ms,
//! factor 2, jitter ±25%, capped at 30s, max 5 attempts.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub jitter_pct: f64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 200,
            factor: 2.0,
            jitter_pct: 0.25,
            cap_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl From<&crate::config::ReconcilerSettings> for RetryPolicy {
    fn from(s: &crate::config::ReconcilerSettings) -> Self {
        Self {
            base_ms: s.retry_base_ms,
            factor: s.retry_factor,
            jitter_pct: s.retry_jitter_pct,
            cap_ms: s.retry_cap_ms,
            max_attempts: s.retry_max_attempts,
        }
    }
}

/// Compute the delay before retry attempt `attempt` (1-indexed).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let raw = policy.base_ms as f64 * policy.factor.powi(attempt as i32 - 1);
    let capped = raw.min(policy.cap_ms as f64);
    let jitter_span = capped * policy.jitter_pct;
    let jitter = if jitter_span > 0.0 {
        rand::thread_rng().gen_range(-jitter_span..=jitter_span)
    } else {
        0.0
    };
    let total = (capped + jitter).max(0.0);
    Duration::from_millis(total as u64)
}
