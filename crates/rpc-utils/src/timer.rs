//! Monotonic stopwatch.

use std::time::{Duration, Instant};

/// Measures wall time since construction or the last reset.
///
/// Readings never mutate the timer, so a single instance can be sampled any
/// number of times.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a timer started now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Alias for [`Timer::new`] that reads better at call sites.
    #[must_use]
    pub fn start() -> Self {
        Self::new()
    }

    /// Restart the measurement from now.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    /// Time elapsed since the start point.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Milliseconds elapsed, with sub-millisecond precision.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Seconds elapsed.
    #[must_use]
    pub fn elapsed_sec(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
