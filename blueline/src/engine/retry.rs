//! Retry policies with configurable backoff shapes.
//!
//! Every step carries its own policy: an attempt limit, a base delay, and a
//! backoff shape. Delays are deterministic so that resumed runs and tests
//! behave identically.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff shape for delays between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffShape {
    /// delay = base
    Constant,
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Retry policy for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub attempt_limit: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff shape.
    pub backoff: BackoffShape,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_limit: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffShape::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            attempt_limit: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff: BackoffShape::Constant,
        }
    }

    /// Sets the attempt limit.
    #[must_use]
    pub const fn with_attempt_limit(mut self, limit: usize) -> Self {
        self.attempt_limit = limit;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff shape.
    #[must_use]
    pub const fn with_backoff(mut self, shape: BackoffShape) -> Self {
        self.backoff = shape;
        self
    }

    /// Returns the delay to wait after the given failed attempt (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay_ms;
        let delay = match self.backoff {
            BackoffShape::Constant => base,
            BackoffShape::Linear => base.saturating_mul(attempt as u64),
            BackoffShape::Exponential => {
                base.saturating_mul(2u64.saturating_pow((attempt - 1) as u32))
            }
        };
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Returns true if another attempt is allowed after `attempts` failures.
    #[must_use]
    pub const fn allows_retry(&self, attempts: usize) -> bool {
        attempts < self.attempt_limit
    }
}
