//! Reconnect delay policy for the event subscriber.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff capped at `max_backoff`, plus uniform jitter below
/// `max_jitter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_backoff: Duration,
    pub max_jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_millis(1_000))
    }
}

impl ReconnectPolicy {
    pub fn new(max_backoff: Duration, max_jitter: Duration) -> Self {
        Self {
            max_backoff,
            max_jitter,
        }
    }

    /// `min(2^attempt seconds, max_backoff)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }

    /// Base delay plus a random jitter in `[0, max_jitter)`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }

    /// Largest delay `delay` can return
    pub fn upper_bound(&self) -> Duration {
        self.max_backoff + self.max_jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let secs: Vec<u64> = (1..=6).map(|n| policy.base_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.base_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_stays_within_jitter_window() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..40 {
            let delay = policy.delay_with(attempt, &mut rng);
            let base = policy.base_delay(attempt);
            assert!(delay >= base);
            assert!(delay < base + policy.max_jitter);
            assert!(delay < policy.upper_bound());
        }
    }

    #[test]
    fn test_zero_jitter() {
        let policy = ReconnectPolicy::new(Duration::from_secs(8), Duration::ZERO);
        assert_eq!(policy.delay(10), Duration::from_secs(8));
    }
}
