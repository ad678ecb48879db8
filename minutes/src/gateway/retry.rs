//! Backoff between full provider cycles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay between cycles in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between cycles in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// No waiting at all; used by tests and by callers that pace themselves.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Calculate the delay before cycle `attempt` (1-based; the first cycle never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(2) as i32);

        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.use_jitter {
            // Add up to 25% jitter
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cycle_never_waits() {
        assert_eq!(RetryConfig::default().delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RetryConfig {
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
            use_jitter: false,
        };
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            backoff_multiplier: 1.0,
            use_jitter: true,
        };
        for _ in 0..20 {
            let d = config.delay_for_attempt(2).as_millis();
            assert!((1000..=1250).contains(&d));
        }
    }

    #[test]
    fn test_immediate() {
        assert_eq!(RetryConfig::immediate().delay_for_attempt(5), Duration::ZERO);
    }
}
