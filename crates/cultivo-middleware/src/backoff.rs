//! Capped, jittered exponential backoff for reconnect attempts.
//!
//! ```text
//! delay(attempt) = min(max, base * 2^attempt) + uniform(0..=jitter)
//! ```
//!
//! The exponent is clamped to [`MAX_EXPONENT`] so the multiplication can
//! never overflow however long the broker stays unreachable.

use std::time::Duration;

use cultivo_types::BackoffConfig;
use rand::Rng;

/// Largest exponent applied to the base delay.
pub const MAX_EXPONENT: u32 = 20;

/// Reconnect delay policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// Ceiling of the un-jittered delay.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before attempt `attempt` (0-based), with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Delay before attempt `attempt`, drawing jitter from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=jitter_ms))
        };
        self.ceiling(attempt).saturating_add(jitter)
    }

    /// Delay before attempt `attempt` without jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(cfg: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(cfg.base_ms),
            Duration::from_millis(cfg.max_ms),
            Duration::from_millis(cfg.jitter_ms),
        )
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy(jitter_ms: u64) -> Backoff {
        Backoff::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
            Duration::from_millis(jitter_ms),
        )
    }

    #[test]
    fn ceiling_doubles_until_capped() {
        let backoff = policy(0);
        assert_eq!(backoff.ceiling(0), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(3), Duration::from_millis(800));
        assert_eq!(backoff.ceiling(6), Duration::from_secs(5));
        assert_eq!(backoff.ceiling(30), Duration::from_secs(5));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let backoff = Backoff::new(Duration::from_secs(u64::MAX / 2), Duration::MAX, Duration::ZERO);
        assert_eq!(backoff.ceiling(u32::MAX), Duration::MAX);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let backoff = policy(50);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..40 {
            let delay = backoff.delay_with(attempt, &mut rng);
            let ceiling = backoff.ceiling(attempt);
            assert!(delay >= ceiling);
            assert!(delay <= ceiling + Duration::from_millis(50));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let backoff = policy(0);
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn from_config() {
        let backoff = Backoff::from(&BackoffConfig {
            base_ms: 250,
            max_ms: 1_000,
            jitter_ms: 0,
        });
        assert_eq!(backoff.ceiling(0), Duration::from_millis(250));
        assert_eq!(backoff.ceiling(10), Duration::from_secs(1));
    }
}
