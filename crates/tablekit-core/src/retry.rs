//! Exponential backoff with jitter.

use std::time::Duration;

use typed_builder::TypedBuilder;

/// Backoff schedule for batch and transaction retries.
///
/// `delay(attempt) = min(initial * factor^attempt, max)`, then scaled by
/// `1 + (2r - 1) * jitter` for `r` uniform in `[0, 1)` and clamped at zero.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[builder(default = 3)]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[builder(default = Duration::from_millis(100))]
    pub initial_delay: Duration,
    /// Upper bound of the un-jittered delay.
    #[builder(default = Duration::from_secs(5))]
    pub max_delay: Duration,
    /// Growth per attempt.
    #[builder(default = 2.0)]
    pub factor: f64,
    /// Relative jitter in `[0, 1]`.
    #[builder(default = 0.25)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Transaction retries: 100, 200, 400 ms with 10% jitter.
    #[must_use]
    pub fn transaction_default() -> Self {
        Self {
            max_delay: Duration::from_secs(1),
            jitter: 0.1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based), with fresh jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::random::<f64>())
    }

    /// Delay before retry `attempt` for a given jitter sample `r` in `[0, 1)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_with(&self, attempt: u32, r: f64) -> Duration {
        let initial = self.initial_delay.as_nanos() as f64;
        let max = self.max_delay.as_nanos() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (initial * self.factor.powi(exponent)).min(max);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let scaled = (base * (1.0 + (2.0 * r - 1.0) * jitter)).max(0.0);
        if scaled.is_finite() {
            Duration::from_nanos(scaled.round() as u64)
        } else {
            self.max_delay
        }
    }
}
