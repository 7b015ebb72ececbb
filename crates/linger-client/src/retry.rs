//! Backoff between failed stream fetches.

use std::time::Duration;

use crate::error::{Error, Result};

/// Capped exponential backoff.
///
/// The delay after the `n`th consecutive failure is `initial * 2^(n-1)`, capped
/// at `max`. It is never zero, so a failing server is never hammered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Checks that delays are non-zero and the cap is not below the first delay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.initial.is_zero() {
            return Err(Error::InvalidConfig(
                "backoff initial delay must be greater than zero".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(Error::InvalidConfig(format!(
                "backoff max delay {:?} is below the initial delay {:?}",
                self.max, self.initial
            )));
        }

        Ok(())
    }

    /// Delay before retrying after `failures` consecutive failures (at least 1).
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self
            .initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        if delay.is_zero() {
            Duration::from_millis(1)
        } else {
            delay
        }
    }
}
