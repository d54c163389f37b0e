//! Time sources

use std::time::Instant;

use vmops_api::sync::{AtomicU64, Ordering};
use vmops_api::{Ticks, TimeSource};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Monotonic clock counting nanoseconds since its creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Starts a new clock
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Ticks {
        self.origin.elapsed().as_nanos() as Ticks
    }

    fn from_millis(&self, ms: u64) -> Ticks {
        ms.saturating_mul(NANOS_PER_MILLI)
    }

    fn to_millis(&self, ticks: Ticks) -> f64 {
        ticks as f64 / NANOS_PER_MILLI as f64
    }
}

/// Deterministic clock that advances by a fixed step on every read
///
/// Ticks are nanoseconds, like `MonotonicClock`.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    /// Clock starting at zero that advances `step` ticks per `now()`
    pub fn new(step: Ticks) -> Self {
        Self { now: AtomicU64::new(0), step }
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Ticks {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }

    fn from_millis(&self, ms: u64) -> Ticks {
        ms.saturating_mul(NANOS_PER_MILLI)
    }

    fn to_millis(&self, ticks: Ticks) -> f64 {
        ticks as f64 / NANOS_PER_MILLI as f64
    }
}
