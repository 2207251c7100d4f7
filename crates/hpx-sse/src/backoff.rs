//! Reconnection delays.
//!
//! The first retry waits `min_retry_interval` and each further failure
//! doubles the wait, up to `max_retry_interval`. Optional jitter randomizes
//! part of every delay.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff parameters for reconnection delays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Share (0.0-1.0) of the delay that is randomized.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Validate the parameters.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Min retry interval must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max retry interval must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max retry interval must be >= min retry interval".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Delay before retry number `attempt + 1`.
///
/// `attempt` is zero-based: attempt 0 waits `initial_delay`, every further
/// attempt multiplies by `factor`, and the result never exceeds `max_delay`.
pub fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = config.factor.powf(f64::from(attempt));
    let base = (initial * exponent).min(max);

    if config.jitter == 0.0 {
        return Duration::from_secs_f64(base);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::from_secs_f64(blended)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(100),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_doubles_from_initial_delay() {
        let config = config();
        assert_eq!(calculate_backoff(config, 0), Duration::from_millis(2));
        assert_eq!(calculate_backoff(config, 1), Duration::from_millis(4));
        assert_eq!(calculate_backoff(config, 2), Duration::from_millis(8));
        assert_eq!(calculate_backoff(config, 5), Duration::from_millis(64));
    }

    #[test]
    fn test_capped_and_monotonic() {
        let config = config();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = calculate_backoff(config, attempt);
            assert!(delay >= previous, "attempt {attempt} went down");
            assert!(delay <= config.max_delay);
            previous = delay;
        }
        assert_eq!(previous, config.max_delay);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = BackoffConfig {
            jitter: 0.5,
            ..config()
        };
        for _ in 0..100 {
            let delay = calculate_backoff(config, 3);
            assert!(delay >= Duration::from_micros(7_999));
            assert!(delay <= Duration::from_micros(16_001));
        }
    }

    #[test]
    fn test_validation() {
        assert!(config().validate().is_ok());
        assert!(BackoffConfig::default().validate().is_ok());

        let zero = BackoffConfig {
            initial_delay: Duration::ZERO,
            ..config()
        };
        assert_eq!(
            zero.validate().expect_err("should fail"),
            "Min retry interval must be > 0"
        );

        let inverted = BackoffConfig {
            max_delay: Duration::from_millis(1),
            ..config()
        };
        assert_eq!(
            inverted.validate().expect_err("should fail"),
            "Max retry interval must be >= min retry interval"
        );

        let jitter = BackoffConfig {
            jitter: 1.5,
            ..config()
        };
        assert!(jitter.validate().is_err());
    }
}
