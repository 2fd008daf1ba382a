//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff with a cap and additive jitter.
///
/// delay(n) = min(base_delay * multiplier^n, max_delay) + U[0, jitter)
///
/// where `n` is the retry count *before* this failure (0 on the first
/// failure).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound of the exponential part.
    pub max_delay: Duration,

    /// Upper bound (exclusive) of the random extra delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: Duration::from_millis(cfg.jitter_ms),
        }
    }
}

impl RetryPolicy {
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic part of the delay. Monotonically non-decreasing in
    /// `retry_count` and never above `max_delay`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Backoff plus jitter; what the worker actually waits.
    pub fn delay_with_jitter(&self, retry_count: u32) -> Duration {
        let base = self.backoff(retry_count);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..jitter_ms.max(1));
        base + Duration::from_millis(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(2));
        assert_eq!(p.backoff(1), Duration::from_secs(4));
        assert_eq!(p.backoff(2), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let p = policy();
        let mut prev = Duration::ZERO;
        for n in 0..200 {
            let d = p.backoff(n);
            assert!(d >= prev, "backoff({n}) = {d:?} < {prev:?}");
            assert!(d <= p.max_delay);
            prev = d;
        }
        assert_eq!(p.backoff(u32::MAX), p.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy().with_jitter(Duration::from_millis(500));
        for _ in 0..100 {
            let d = p.delay_with_jitter(1);
            assert!(d >= Duration::from_secs(4));
            assert!(d < Duration::from_secs(4) + Duration::from_millis(500));
        }
    }

    #[test]
    fn policy_from_config() {
        let cfg = RetryConfig {
            base_delay_ms: 250,
            max_delay_ms: 10_000,
            jitter_ms: 0,
        };
        let p = RetryPolicy::from(&cfg);
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.delay_with_jitter(2), Duration::from_millis(1000));
    }
}
