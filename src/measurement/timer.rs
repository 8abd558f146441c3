//! Monotonic wall-clock timing of oracle calls.
//!
//! Durations come from `std::time::Instant`, which is monotonic on every
//! supported platform. Calls are wrapped in `black_box` so the compiler can
//! neither elide an in-process comparison nor move it across the clock reads.

use std::hint::black_box as std_black_box;
use std::time::{Duration, Instant};

/// Wrapper around `std::hint::black_box` for preventing compiler optimizations.
#[inline]
pub fn black_box<T>(x: T) -> T {
    std_black_box(x)
}

/// Estimate the smallest non-zero step of the monotonic clock.
fn measure_resolution() -> Duration {
    let mut min_step = Duration::MAX;

    for _ in 0..1000 {
        let t1 = Instant::now();
        let mut t2 = Instant::now();
        // Spin until the clock ticks, bounded so a frozen clock cannot hang us.
        for _ in 0..10_000 {
            if t2 > t1 {
                break;
            }
            t2 = Instant::now();
        }
        let step = t2.saturating_duration_since(t1);
        if !step.is_zero() && step < min_step {
            min_step = step;
        }
    }

    if min_step == Duration::MAX {
        Duration::from_nanos(1)
    } else {
        min_step
    }
}

/// High-level timer for measuring a single call.
#[derive(Debug, Clone)]
pub struct Timer {
    /// Estimated clock resolution.
    resolution: Duration,
}

impl Timer {
    /// Create a timer and estimate the clock resolution.
    pub fn new() -> Self {
        Self {
            resolution: measure_resolution(),
        }
    }

    /// Create a timer with a known resolution, skipping calibration.
    pub fn with_resolution(resolution: Duration) -> Self {
        Self { resolution }
    }

    /// Estimated clock resolution.
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Run `f` and return its result along with the elapsed time.
    #[inline]
    pub fn measure<F, T>(&self, f: F) -> (T, Duration)
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let value = black_box(f());
        let elapsed = start.elapsed();
        (value, elapsed)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
