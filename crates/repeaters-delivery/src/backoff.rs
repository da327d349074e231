// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff with a ceiling and retry budgets.

use std::time::Duration;

use repeaters_config::model::RetryConfig;

/// Retry schedule and the limits that end retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_interval: Duration,
    pub max_interval: Duration,
    /// Attempts (including the first) after which a retryable failure cancels.
    pub max_attempts: u32,
    /// Age after which a retryable failure cancels.
    pub max_age: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_interval: Duration::from_secs(config.base_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            max_attempts: config.max_attempts,
            max_age: Duration::from_secs(config.max_age_secs),
        }
    }

    /// Delay before the next attempt after `attempt` attempts have been made.
    ///
    /// `delay(n) = min(base * 2^(n-1), max)`. `attempt` is clamped to at
    /// least 1 and the computation saturates at the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_interval.checked_mul(factor))
            .map_or(self.max_interval, |d| d.min(self.max_interval))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(base: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            base_interval: Duration::from_secs(base),
            max_interval: Duration::from_secs(max),
            max_attempts: 6,
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }

    #[test]
    fn fifth_attempt_with_one_minute_base() {
        assert_eq!(policy(60, 3600).delay(5), Duration::from_secs(960));
    }

    #[test]
    fn first_attempt_waits_base_interval() {
        assert_eq!(policy(60, 3600).delay(1), Duration::from_secs(60));
        assert_eq!(policy(60, 3600).delay(0), Duration::from_secs(60));
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(policy(60, 3600).delay(7), Duration::from_secs(3600));
        assert_eq!(policy(60, 3600).delay(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn defaults_match_config_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_interval, Duration::from_secs(3600));
        assert_eq!(p.max_interval, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(p.max_attempts, 6);
    }

    proptest! {
        #[test]
        fn delay_is_monotonic_and_bounded(
            base in 1u64..100_000,
            extra in 0u64..10_000_000,
            n in 1u32..200,
        ) {
            let p = policy(base, base + extra);
            let d = p.delay(n);
            prop_assert!(d <= p.max_interval);
            prop_assert!(d >= p.base_interval.min(p.max_interval));
            prop_assert!(p.delay(n + 1) >= d);
        }

        #[test]
        fn delay_matches_closed_form_below_ceiling(base in 1u64..1000, n in 1u32..20) {
            let p = policy(base, u64::MAX / 4);
            prop_assert_eq!(p.delay(n), Duration::from_secs(base << (n - 1)));
        }
    }
}
