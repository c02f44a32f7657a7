// src/engine/retry.rs

//! Retry backoff policy.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with multiplicative jitter.
///
/// The delay before attempt `n + 1` is
/// `base * multiplier^(n - 1)`, scaled by a random factor in
/// `[1 - jitter, 1 + jitter]` and capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`. Zero disables jitter.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of attempts already
    /// consumed (1-indexed: the first failure passes `attempts = 1`).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let factor = 1.0 + self.jitter * rand::thread_rng().gen_range(-1.0..=1.0);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn backoff_doubles_without_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_delay(2), Duration::from_secs(2));
        assert_eq!(policy.next_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(30), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..no_jitter()
        };
        for _ in 0..100 {
            let d = policy.next_delay(2).as_secs_f64();
            assert!((1.0..=3.0).contains(&d), "delay {d} out of jitter bounds");
        }
    }
}
