//! Retry budget and backoff schedule.

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff.
///
/// Waiting before attempt `n + 1` after `n` failed attempts takes
/// `base_delay * backoff_factor^(n - 1)`, plus up to `jitter` of uniform noise.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    budget: u32,
    base_delay: Duration,
    backoff_factor: f64,
    jitter: Duration,
    challenge_settle: Duration,
}

impl RetryPolicy {
    /// `budget` is the total number of attempts; zero is treated as one.
    pub fn new(budget: u32) -> Self {
        Self {
            budget: budget.max(1),
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Factors below 1.0 are clamped to 1.0.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Extra wait before retrying a challenge page.
    pub fn with_challenge_settle(mut self, settle: Duration) -> Self {
        self.challenge_settle = settle;
        self
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    pub fn challenge_settle(&self) -> Duration {
        self.challenge_settle
    }

    /// Deterministic part of the wait after `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(64) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Full wait including jitter.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let base = self.backoff(failed_attempts);
        if self.jitter.is_zero() {
            return base;
        }
        let noise = rand::thread_rng().gen_range(0.0..=self.jitter.as_secs_f64());
        base.saturating_add(Duration::from_secs_f64(noise))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 1.5,
            jitter: Duration::ZERO,
            challenge_settle: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_with_factor_two() {
        let policy = RetryPolicy::new(4).with_backoff_factor(2.0);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn default_factor_is_one_and_a_half() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_millis(1500));
        assert_eq!(policy.backoff(3), Duration::from_millis(2250));
    }

    #[test]
    fn zero_budget_still_allows_one_attempt() {
        assert_eq!(RetryPolicy::new(0).budget(), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(500));
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn huge_exponents_saturate() {
        let policy = RetryPolicy::new(10).with_backoff_factor(1e300);
        assert_eq!(policy.backoff(60), Duration::MAX);
    }
}
