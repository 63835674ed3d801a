//! Run-wide cooperative cancellation signal.
//!
//! The signal transitions once from running to cancelled and never resets.
//! Blocking waits (rate-limiter slots, retry backoff) park on the paired
//! condition variable so they wake as soon as the run is cancelled.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SignalState {
    cancelled: Mutex<bool>,
    changed: Condvar,
}

/// Cloneable handle to one run's cancellation state.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    state: Arc<SignalState>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the run cancelled and wakes every waiter. Returns `true` only for
    /// the call that performed the transition.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *cancelled {
            return false;
        }
        *cancelled = true;
        self.state.changed.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for up to `timeout`, returning early with `true` if the run is
    /// (or becomes) cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .state
                .changed
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
        true
    }
}
