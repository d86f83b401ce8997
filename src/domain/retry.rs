use std::time::Duration;

use rand::Rng;

use super::failure::{FailureKind, StageFailure};

/// Backoff and attempt budgets for the whole pipeline. Lives in the Ledger;
/// nothing else in the system schedules retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Uniform jitter added on top of the exponential delay, as a fraction
    /// of it. Must stay below 1.0 so consecutive delays keep increasing.
    pub jitter_ratio: f64,
    pub max_attempts: u32,
    /// Quota-style failures back off harder and give up earlier.
    pub resource_delay_multiplier: u32,
    pub resource_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            jitter_ratio: 0.25,
            max_attempts: 5,
            resource_delay_multiplier: 4,
            resource_max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt leaves budget for another try.
    pub fn attempts_remaining(&self, kind: FailureKind, attempt_count: u32) -> bool {
        match kind {
            FailureKind::Malformed => false,
            FailureKind::Transient => attempt_count < self.max_attempts,
            FailureKind::ResourceExhausted => attempt_count < self.resource_max_attempts,
        }
    }

    /// Delay before the next attempt after `attempt_count` attempts have been
    /// started. Exponential in the attempt number, capped, with additive
    /// jitter; a server retry hint wins when it is longer.
    pub fn delay_after(&self, failure: &StageFailure, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);

        if failure.kind == FailureKind::ResourceExhausted {
            delay = delay.saturating_mul(self.resource_delay_multiplier);
        }

        delay = delay.min(self.max_delay);

        let jitter_span = delay.as_secs_f64() * self.jitter_ratio;
        if jitter_span > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..jitter_span);
            delay += Duration::from_secs_f64(jitter);
        }

        match failure.retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_transient_failures_when_computing_delays_then_delays_strictly_increase() {
        let policy = RetryPolicy::default();
        let failure = StageFailure::transient("timeout");

        let mut previous = Duration::ZERO;
        for attempt in 1..=4 {
            let delay = policy.delay_after(&failure, attempt);
            assert!(
                delay > previous,
                "attempt {} delay {:?} not above {:?}",
                attempt,
                delay,
                previous
            );
            previous = delay;
        }
    }

    #[test]
    fn given_retry_hint_longer_than_backoff_when_computing_delay_then_hint_wins() {
        let policy = RetryPolicy::default();
        let failure =
            StageFailure::transient("rate limited").with_retry_after(Some(Duration::from_secs(600)));

        let delay = policy.delay_after(&failure, 1);
        assert_eq!(delay, Duration::from_secs(600));
    }

    #[test]
    fn given_malformed_failure_when_checking_budget_then_no_attempts_remain() {
        let policy = RetryPolicy::default();
        assert!(!policy.attempts_remaining(FailureKind::Malformed, 1));
    }

    #[test]
    fn given_resource_exhaustion_when_checking_budget_then_cap_is_lower() {
        let policy = RetryPolicy::default();
        assert!(policy.attempts_remaining(FailureKind::Transient, 4));
        assert!(!policy.attempts_remaining(FailureKind::ResourceExhausted, 4));
    }
}
