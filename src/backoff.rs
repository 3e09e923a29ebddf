use rand::Rng;
use std::time::Duration;

use crate::config::Config;

/// Retry delay that doubles per attempt, capped, with up to `jitter_percent`
/// of random slack added on top.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl ExponentialBackoff {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_percent: 10,
        }
    }

    /// Delays used between HTTP retries.
    pub const fn for_requests() -> Self {
        Self::new(Config::RETRY_BACKOFF_MS, Config::RETRY_BACKOFF_MAX_MS)
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent.min(100);
        self
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped_delay = exponential_delay.min(self.max_ms);
        let max_jitter = capped_delay * self.jitter_percent / 100;
        let jitter = if max_jitter > 0 {
            rand::thread_rng().gen_range(0..=max_jitter)
        } else {
            0
        };
        Duration::from_millis(capped_delay + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let backoff = ExponentialBackoff::new(100, 10000).with_jitter(0);
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert_eq!(backoff.delay(2).as_millis(), 400);
    }

    #[test]
    fn test_max_cap() {
        let backoff = ExponentialBackoff::new(100, 1000).with_jitter(0);
        assert_eq!(backoff.delay(10).as_millis(), 1000);
        assert_eq!(backoff.delay(u32::MAX).as_millis(), 1000);
    }

    #[test]
    fn test_jitter_stays_within_percent() {
        let backoff = ExponentialBackoff::new(1000, 10_000).with_jitter(10);
        for _ in 0..50 {
            let ms = backoff.delay(0).as_millis();
            assert!((1000..=1100).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn test_request_defaults() {
        let backoff = ExponentialBackoff::for_requests().with_jitter(0);
        assert_eq!(backoff.delay(0).as_millis() as u64, Config::RETRY_BACKOFF_MS);
    }
}
