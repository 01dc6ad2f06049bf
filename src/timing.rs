//! Centralized timing utilities.
//!
//! Wraps `std::time::Instant` so wall-clock measurements of tests and
//! validation runs are taken one way.

use std::time::Instant;

/// Start a timer. Returns the current instant.
#[inline]
pub fn start_timer() -> Instant {
    Instant::now()
}

/// Whole milliseconds elapsed since `timer` was started.
#[inline]
pub fn elapsed_millis(timer: &Instant) -> u64 {
    u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX)
}
