//! Reconnect policy shared by all link workers.
//!
//! A link worker retries failed accept/connect attempts forever by default,
//! waiting [`ReconnectOptions::delay_for_attempt`] between attempts. The
//! attempt counter resets whenever a connection is established.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Options for automatic reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Maximum number of consecutive failed attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to use exponential backoff.
    pub use_exponential_backoff: bool,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
            jitter: true,
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry immediately after every failure, forever.
    ///
    /// The host stack's own accept/connect latency is the only pacing.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            use_exponential_backoff: false,
            jitter: false,
            ..Default::default()
        }
    }

    /// Create options with a fixed delay (no backoff, no jitter).
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            use_exponential_backoff: false,
            jitter: false,
            ..Default::default()
        }
    }

    /// Set maximum number of consecutive failed attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Whether another attempt is allowed after `failed` consecutive failures.
    pub fn allows_attempt(&self, failed: u32) -> bool {
        self.max_attempts.is_none_or(|max| failed < max)
    }

    /// Calculate delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = if self.use_exponential_backoff {
            let secs = self.initial_delay.as_secs_f64()
                * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
            secs.min(self.max_delay.as_secs_f64())
        } else {
            self.initial_delay.as_secs_f64()
        };

        let delay = if self.jitter && base > 0.0 {
            base * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            base
        };

        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0 when exponential backoff is on
    /// - `max_delay` >= `initial_delay`
    /// - `max_attempts` is not zero
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.use_exponential_backoff && self.initial_delay.is_zero() {
            return Err(Error::invalid_config(
                "initial_delay must be > 0 with exponential backoff",
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::invalid_config("max_attempts must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_options_default() {
        let opts = ReconnectOptions::default();
        assert!(opts.max_attempts.is_none());
        assert!(opts.use_exponential_backoff);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_delay_calculation() {
        let opts = ReconnectOptions::default()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .jitter(false);

        assert_eq!(opts.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(opts.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(opts.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(opts.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let opts = ReconnectOptions::default()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(10))
            .jitter(false);

        assert_eq!(opts.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(opts.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let opts = ReconnectOptions::default()
            .initial_delay(Duration::from_millis(400))
            .max_delay(Duration::from_secs(10));
        for _ in 0..50 {
            let d = opts.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_fixed_delay() {
        let opts = ReconnectOptions::fixed_delay(Duration::from_secs(5));
        assert_eq!(opts.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(opts.delay_for_attempt(5), Duration::from_secs(5));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let opts = ReconnectOptions::immediate();
        assert_eq!(opts.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(opts.delay_for_attempt(100), Duration::ZERO);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_allows_attempt() {
        assert!(ReconnectOptions::default().allows_attempt(u32::MAX));
        let opts = ReconnectOptions::default().max_attempts(3);
        assert!(opts.allows_attempt(2));
        assert!(!opts.allows_attempt(3));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ReconnectOptions::default().backoff_multiplier(0.5).validate().is_err());
        assert!(ReconnectOptions::default().backoff_multiplier(f64::NAN).validate().is_err());
        assert!(ReconnectOptions::default().initial_delay(Duration::ZERO).validate().is_err());
        assert!(
            ReconnectOptions::default()
                .initial_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(ReconnectOptions::default().max_attempts(0).validate().is_err());
    }
}
