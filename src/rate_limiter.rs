//! Token-bucket limiter shared by every enrichment worker in one run.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::cancellation::CancellationSignal;

/// Upper bound on a single park while waiting for a slot. Keeps the wait
/// responsive to clock drift between the limiter and the condition variable.
const MAX_SLOT_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Returned by [`RequestRateLimiter::acquire`] when the run was cancelled
/// before a token became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limiter wait cancelled")]
pub struct AcquireCancelled;

/// Continuous-refill limiter configured in requests per minute.
pub struct RequestRateLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
    requests_per_minute: NonZeroU32,
}

impl RequestRateLimiter {
    /// Creates a limiter granting `requests_per_minute` tokens per minute with
    /// at most `burst` tokens available at once. Zero values are raised to 1.
    pub fn per_minute(requests_per_minute: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(rate).allow_burst(burst)),
            clock: DefaultClock::default(),
            requests_per_minute: rate,
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute.get()
    }

    /// Blocks until a token is available or `cancel` fires.
    pub fn acquire(&self, cancel: &CancellationSignal) -> Result<(), AcquireCancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(AcquireCancelled);
            }
            match self.limiter.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => {
                    let wait = not_until
                        .wait_time_from(self.clock.now())
                        .min(MAX_SLOT_WAIT_SLICE);
                    if cancel.wait_timeout(wait) {
                        return Err(AcquireCancelled);
                    }
                }
            }
        }
    }
}
