//! Backoff strategies

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed,

    /// delay = initial_delay * attempt
    Linear,

    /// delay = initial_delay * base^(attempt-1)
    Exponential { base: f64 },
}

/// Stateless delay calculator
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffCalculator {
    pub fn new(
        strategy: BackoffStrategy,
        initial_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            strategy,
            initial_delay,
            max_delay,
            jitter,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped_delay = self.base_delay(attempt).min(self.max_delay);

        if self.jitter {
            add_jitter(capped_delay).min(self.max_delay)
        } else {
            capped_delay
        }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi(attempt.min(64) as i32 - 1);
                let nanos = self.initial_delay.as_nanos() as f64 * multiplier;
                if nanos.is_finite() && nanos < u64::MAX as f64 {
                    Duration::from_nanos(nanos as u64)
                } else {
                    self.max_delay
                }
            }
        }
    }
}

// +/-20%
fn add_jitter(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..1.2);
    Duration::from_nanos((delay.as_nanos() as f64 * factor) as u64)
}

/// Stateful backoff for a loop that pauses on repeated failures.
///
/// Each `next_delay` call counts as one more consecutive failure; `reset`
/// is called after the first success.
#[derive(Debug, Clone)]
pub struct Backoff {
    calculator: BackoffCalculator,
    attempt: u32,
}

impl Backoff {
    pub fn new(calculator: BackoffCalculator) -> Self {
        Self {
            calculator,
            attempt: 0,
        }
    }

    /// Exponential doubling from `initial` up to `max`, with jitter
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::new(BackoffCalculator::new(
            BackoffStrategy::Exponential { base: 2.0 },
            initial,
            max,
            true,
        ))
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.calculator.calculate_delay(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
