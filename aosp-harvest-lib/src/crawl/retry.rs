//! Backoff policy for rate-limited requests.

use core::time::Duration;

/// Upper bound for a single computed backoff delay.
pub const MAX_DELAY: Duration = Duration::from_secs(10 * 60);

/// How long to back off after the remote answers "too many requests", and when to give up.
///
/// Delays grow exponentially from `cooldown` (doubling per attempt, capped at
/// ten minutes). A `max_attempts` of zero disables the cap, which retries
/// forever with a fixed `cooldown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    cooldown: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 6)
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(cooldown: Duration, max_attempts: u32) -> Self {
        Self { cooldown, max_attempts }
    }

    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Retries granted on top of the original request; zero means unlimited.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before retry number `attempt` (zero-based), or `None` once the budget is spent.
    ///
    /// A server-provided `retry_after` only ever lengthens the delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration> {
        let floor = retry_after.unwrap_or_default();

        if !self.is_bounded() {
            return Some(self.cooldown.max(floor));
        }

        if attempt >= self.max_attempts {
            return None;
        }

        let factor = 2u32.saturating_pow(attempt);
        let delay = self.cooldown.saturating_mul(factor).min(MAX_DELAY);
        Some(delay.max(floor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_policy_doubles_then_gives_up() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 3);
        assert_eq!(policy.delay_for(0, None), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(1, None), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_for(2, None), Some(Duration::from_secs(40)));
        assert_eq!(policy.delay_for(3, None), None);
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 40);
        assert_eq!(policy.delay_for(30, None), Some(MAX_DELAY));
    }

    #[test]
    fn retry_after_extends_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 3);
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(90))), Some(Duration::from_secs(90)));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(1))), Some(Duration::from_secs(20)));
    }

    #[test]
    fn unbounded_policy_uses_fixed_cooldown() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 0);
        assert!(!policy.is_bounded());
        assert_eq!(policy.delay_for(0, None), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(1_000, None), Some(Duration::from_secs(10)));
    }
}
