//! Shared retry and backoff policy
//!
//! Both the chat relay and the notification channel consume the same policy:
//! the relay uses it for bounded connect retries, the channel for its
//! reconnect schedule. Delays grow geometrically and are capped.

use std::time::Duration;

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial try (relay connect phase)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied to the delay after every attempt
    pub growth_factor: f64,
    /// Ceiling the delay never exceeds
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            growth_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum retry count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the growth factor
    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Set the delay ceiling
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (zero-based): `min(base * growth^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.growth_factor.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// Policy used by the notification channel reconnect loop
    pub fn reconnect() -> Self {
        Self {
            max_retries: u32::MAX,
            base_delay: Duration::from_secs(3),
            growth_factor: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Reconnect backoff state
///
/// Tracks the next delay across consecutive failures. `reset()` is called on
/// every successful open so one good connection restores the base delay.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    delay: Duration,
}

impl Backoff {
    /// Create a backoff tracker starting at the policy's base delay
    pub fn new(policy: RetryPolicy) -> Self {
        let delay = policy.base_delay;
        Self { policy, delay }
    }

    /// Take the current delay and advance to the next one
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        let grown = self.delay.mul_f64(self.policy.growth_factor);
        self.delay = grown.min(self.policy.max_delay);
        current
    }

    /// Peek at the delay the next failure would wait for
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Restore the base delay after a successful open
    pub fn reset(&mut self) {
        self.delay = self.policy.base_delay;
    }
}
