//! Timing source interface

/// Platform tick unit
pub type Ticks = u64;

/// Monotonic clock convertible between milliseconds and ticks
pub trait TimeSource: Send + Sync {
    /// Current time in ticks; never decreases
    fn now(&self) -> Ticks;

    /// Converts a duration in milliseconds to ticks
    fn from_millis(&self, ms: u64) -> Ticks;

    /// Converts ticks to milliseconds
    fn to_millis(&self, ticks: Ticks) -> f64;
}
