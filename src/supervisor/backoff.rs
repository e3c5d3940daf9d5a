//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// `base × growth^(attempt−1) + jitter`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub growth: f64,
    pub max_jitter: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.growth.max(1.0).powi(exponent);
        let millis = self.base.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(millis as u64)
    }

    /// Delay before retry number `attempt` with `jitter` added, capped at `max`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        self.base_delay(attempt).saturating_add(jitter).min(self.max)
    }

    /// Delay before retry number `attempt` with random jitter in `[0, max_jitter]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff {
            base: Duration::from_secs(5),
            growth: 2.0,
            max_jitter: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }

    #[test]
    fn grows_geometrically() {
        let b = backoff();
        assert_eq!(b.base_delay(1), Duration::from_secs(5));
        assert_eq!(b.base_delay(2), Duration::from_secs(10));
        assert_eq!(b.base_delay(4), Duration::from_secs(40));
    }

    #[test]
    fn capped_at_max_including_jitter() {
        let b = backoff();
        assert_eq!(b.base_delay(10), Duration::from_secs(300));
        assert_eq!(
            b.delay_with_jitter(7, Duration::from_secs(1)),
            Duration::from_secs(300)
        );
        assert_eq!(b.base_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn random_jitter_stays_in_range() {
        let b = backoff();
        for _ in 0..50 {
            let d = b.delay(2);
            assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(11));
        }
    }
}
