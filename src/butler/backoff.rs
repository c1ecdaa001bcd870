//! Reconnect backoff that widens and then settles.
//!
//! The wait for attempt `n` is `base + floor(factor * atan(n) + U[0,1))`
//! seconds. `atan` flattens towards π/2, so the schedule ramps up quickly
//! and then levels off near `base + 1.57 * factor` instead of growing
//! without bound. The factor itself grows on a thinning schedule:
//!
//! | attempt divisible by | factor grows while |
//! |----------------------|--------------------|
//! | 2                    | factor <= 30       |
//! | 4                    | factor <= 40       |
//! | 10                   | factor <= 50       |
//! | 100                  | always             |
//!
//! Only the first matching row applies to a given attempt.

use std::time::Duration;

use rand::Rng;

/// Advance the scaling factor for `attempt`.
pub fn next_factor(attempt: u64, factor: u32) -> u32 {
    let grows = (attempt % 2 == 0 && factor <= 30)
        || (attempt % 4 == 0 && factor <= 40)
        || (attempt % 10 == 0 && factor <= 50)
        || attempt % 100 == 0;

    if grows {
        factor + 1
    } else {
        factor
    }
}

/// Wait before retrying after `attempt`, plus the updated factor.
pub fn jitter<R: Rng + ?Sized>(
    base: Duration,
    attempt: u64,
    factor: u32,
    rng: &mut R,
) -> (Duration, u32) {
    let factor = next_factor(attempt, factor);
    let spread = f64::from(factor) * (attempt as f64).atan() + rng.random::<f64>();
    (base + Duration::from_secs(spread.floor() as u64), factor)
}

/// State of one reconnect sequence. Start a fresh one per outage.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    attempt: u64,
    factor: u32,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            attempt: 1,
            factor: 1,
        }
    }

    /// Attempt number the next wait is computed for (1-based).
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Compute the wait for the current attempt and move to the next one.
    pub fn next_wait(&mut self) -> Duration {
        self.next_wait_with(&mut rand::rng())
    }

    pub fn next_wait_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let (wait, factor) = jitter(self.base, self.attempt, self.factor, rng);
        self.factor = factor;
        self.attempt += 1;
        wait
    }
}
