//! Delay before the next reconnection attempt.
//!
//! The delay grows linearly by `step` for the first `linear_attempts` attempts, then by `slope`
//! per attempt until it reaches `max`. With the default configuration:
//!
//! ```txt
//! attempt:  1   2   3    4    5    6    7    8   ...  13+
//! delay:   45  90  135  180  225  270  360  450  ...  900
//! ```

use std::time::Duration;

/// Backoff parameters.
#[derive(Clone, Debug)]
pub struct Config {
    /// Increment per attempt while in the linear phase.
    pub step: Duration,

    /// Number of attempts in the linear phase.
    pub linear_attempts: u32,

    /// Increment per attempt after the linear phase.
    pub slope: Duration,

    /// Upper bound on any delay.
    pub max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(45),
            linear_attempts: 6,
            slope: Duration::from_secs(90),
            max: Duration::from_secs(900),
        }
    }
}

impl Config {
    /// Delay before reconnection attempt number `attempt` (starting at 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = if attempt <= self.linear_attempts {
            self.step.saturating_mul(attempt)
        } else {
            self.step
                .saturating_mul(self.linear_attempts)
                .saturating_add(self.slope.saturating_mul(attempt - self.linear_attempts))
        };
        delay.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 45; "first")]
    #[test_case(2, 90; "second")]
    #[test_case(3, 135; "third")]
    #[test_case(4, 180; "fourth")]
    #[test_case(5, 225; "fifth")]
    #[test_case(6, 270; "last linear")]
    #[test_case(7, 360; "first sloped")]
    #[test_case(8, 450; "second sloped")]
    #[test_case(12, 810; "below cap")]
    #[test_case(13, 900; "reaches cap")]
    #[test_case(20, 900; "capped")]
    #[test_case(u32::MAX, 900; "saturates")]
    fn test_delay(attempt: u32, seconds: u64) {
        let config = Config::default();
        assert_eq!(config.delay(attempt), Duration::from_secs(seconds));
    }

    #[test]
    fn test_custom() {
        let config = Config {
            step: Duration::from_millis(10),
            linear_attempts: 2,
            slope: Duration::from_millis(100),
            max: Duration::from_millis(250),
        };
        let delays: Vec<_> = (1..=5).map(|attempt| config.delay(attempt)).collect();
        assert_eq!(
            delays,
            [10, 20, 120, 220, 250].map(Duration::from_millis).to_vec()
        );
    }
}
