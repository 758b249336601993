use std::time::Duration;

use rand::Rng;

/// A uniform random delay in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// A range that always yields `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// `[0, max]`, for jitter added on top of another delay.
    pub fn up_to(max: Duration) -> Self {
        Self::new(Duration::ZERO, max)
    }

    pub fn zero() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Pick one delay from the range.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let spread_ms = (self.max - self.min).as_millis() as u64;
        self.min + Duration::from_millis(rand::thread_rng().gen_range(0..=spread_ms))
    }
}

/// How many times to check a condition, and how long to wait between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}
