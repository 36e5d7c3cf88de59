// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with jitter for service call retries.

use std::time::Duration;

/// Cap applied to every retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

const BASE_DELAY: Duration = Duration::from_millis(500);

/// Pure backoff policy: full jitter over an exponentially growing window,
/// capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self { base: BASE_DELAY, max }
    }

    /// The backoff window for the given attempt (0-based): `base * 2^attempt`,
    /// capped at `max`.
    pub fn window(&self, attempt: u32) -> Duration {
        let exp = attempt.min(32);
        let window = self
            .base
            .checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .unwrap_or(self.max);
        window.min(self.max)
    }

    /// Deterministic delay: `fraction` in [0, 1] picks the point in the window.
    pub fn delay_with(&self, attempt: u32, fraction: f64) -> Duration {
        self.window(attempt).mul_f64(fraction.clamp(0.0, 1.0))
    }

    /// Randomized delay for the given attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::random::<f64>())
    }
}

/// Raise `delay` to at least the service-provided retry-after hint, plus up
/// to 20% jitter so a fleet of throttled workers does not retry in lock-step.
pub fn apply_lower_bound(delay: Duration, lower_bound: Option<Duration>) -> Duration {
    apply_lower_bound_with(delay, lower_bound, rand::random::<f64>())
}

pub(crate) fn apply_lower_bound_with(
    delay: Duration,
    lower_bound: Option<Duration>,
    fraction: f64,
) -> Duration {
    match lower_bound {
        Some(lower) if delay < lower => lower + lower.mul_f64(0.2 * fraction.clamp(0.0, 1.0)),
        _ => delay,
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
