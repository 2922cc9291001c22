//! Backoff schedule for retrying transient failures
//!
//! The delay ceiling grows as `base * 2^retry` and is capped at `max`; jitter
//! then spreads concurrent retriers across the interval so they do not retry
//! in lockstep.

use std::time::Duration;

use rand::Rng;

use super::circuit_breaker::{ConfigError, ConfigResult};

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter
    None,
    /// Full jitter: 0 to calculated_delay
    #[default]
    Full,
    /// Equal jitter: calculated_delay/2 to calculated_delay
    Equal,
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(random_up_to(millis)),
            Jitter::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + random_up_to(millis - half))
            }
        }
    }
}

fn random_up_to(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

/// Capped exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: Jitter,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max: Duration::from_secs(32), jitter: Jitter::Full }
    }
}

impl ExponentialBackoff {
    /// Create a backoff with full jitter
    pub fn new(base: Duration, max: Duration) -> ConfigResult<Self> {
        Self::with_jitter(base, max, Jitter::Full)
    }

    pub fn with_jitter(base: Duration, max: Duration, jitter: Jitter) -> ConfigResult<Self> {
        let backoff = Self { base, max, jitter };
        backoff.validate()?;
        Ok(backoff)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max < self.base {
            return Err(ConfigError::Invalid {
                message: format!(
                    "max backoff {:?} must not be smaller than base backoff {:?}",
                    self.max, self.base
                ),
            });
        }
        Ok(())
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Upper bound of the delay before retry number `retry` (0-based):
    /// `min(max, base * 2^retry)`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |delay| delay.min(self.max))
    }

    /// Jittered delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        self.jitter.apply(self.ceiling(retry))
    }
}
