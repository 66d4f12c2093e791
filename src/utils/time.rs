//! Monotonic tick source for liveness tracking.
//!
//! Ticks are milliseconds measured from a process-wide epoch taken on first
//! use. They are comparable only within one process; wall-clock time is never
//! involved, so clock adjustments cannot fake or hide activity.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current monotonic tick in milliseconds.
pub fn now_tick() -> i64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as i64
}

/// Whether `threshold` is strictly later than `reference` on the monotonic
/// tick line. Uses the signed wrapping difference so the comparison stays
/// correct across tick wraparound.
pub fn tick_exceeds(threshold: i64, reference: i64) -> bool {
    threshold.wrapping_sub(reference) > 0
}
